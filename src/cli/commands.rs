//! CLI command implementations

use anyhow::Result;
use clap::ValueEnum;
use std::sync::Arc;
use tracing::info;

use crate::analysis::aggregator::TokenSortKey;
use crate::analysis::cache::ResultCache;
use crate::analysis::pipeline::Analyzer;
use crate::analysis::ranking::{RankBucket, RankingRecord, RankingStats};
use crate::analysis::report::{AnalysisResult, ClusterPage};
use crate::analysis::types::TokenSummary;
use crate::config::Config;
use crate::provider::{HttpProvider, StaticBlacklist};

/// Which part of an analysis to print
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum View {
    Summary,
    Tokens,
    Clusters,
    Ranking,
}

/// Options for the `analyze` command
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub view: View,
    pub sort: TokenSortKey,
    pub page: usize,
    pub page_size: usize,
    pub bucket: Option<RankBucket>,
}

/// Run one analysis against the HTTP providers and print a view
pub async fn analyze(config: Arc<Config>, token: &str, options: AnalyzeOptions) -> Result<()> {
    let provider = Arc::new(HttpProvider::new(config.provider.clone())?);
    let blacklist = Arc::new(StaticBlacklist::new(config.blacklist.iter().cloned()));
    let cache = Arc::new(ResultCache::new(&config.cache));

    info!(blacklisted_tokens = blacklist.len(), "Providers ready");

    let analyzer = Analyzer::new(config, provider.clone(), provider, blacklist, cache.clone())?;

    cache.start().await;
    let outcome = analyzer.analyze_cached(token).await;
    cache.stop().await;
    let handle = outcome?;

    let result = &handle.result;
    if result.blacklisted {
        println!("\nToken {} is blacklisted; nothing analyzed.", result.token_address);
        return Ok(());
    }

    println!("\nRequest: {}", handle.request_id);

    match options.view {
        View::Summary => print_summary(result),
        View::Tokens => print_tokens(&result.token_table(options.sort), options.sort),
        View::Clusters => print_clusters(&result.clusters_page(options.page, options.page_size)),
        View::Ranking => match options.bucket {
            Some(bucket) => print_bucket(bucket, &result.ranking_bucket(bucket)),
            None => print_ranking_stats(&result.stats.ranking),
        },
    }

    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

fn print_summary(result: &AnalysisResult) {
    let stats = &result.stats;

    println!("\n=== WHALE ANALYSIS: {} ===\n", result.token_address);
    println!("Timestamp: {}", result.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("\nHolders:");
    println!("  Fetched: {}", stats.total_holders_fetched);
    println!("  Excluded (pools/exchanges): {}", stats.holders_excluded);
    println!("  Analyzed: {}", stats.total_holders_analyzed);
    println!("  Failed fetches: {}", stats.failed_fetches);
    for address in &stats.failed_addresses {
        println!("    - {}", address);
    }
    println!("\nTokens:");
    println!("  Seen: {}", stats.tokens_before_filter);
    println!("  After noise filter: {}", stats.tokens_after_filter);
    if let Some(target) = result.target_aggregate() {
        println!(
            "  Target: {} holders, ${:.2} total",
            target.holder_count, target.total_value_usd
        );
    }
    println!("\nClusters: {}", stats.cluster_count);
    println!("Conspiracy wallets: {}", stats.conspiracy_count);

    print_ranking_stats(&stats.ranking);
}

fn print_tokens(rows: &[TokenSummary], sort: TokenSortKey) {
    println!("\n=== TOKENS (by {}) ===\n", sort);

    if rows.is_empty() {
        println!("No tokens passed the noise filter.");
        return;
    }

    println!(
        "{:<4} {:<10} {:<46} {:>8} {:>14} {:>12}",
        "#", "SYMBOL", "ADDRESS", "HOLDERS", "TOTAL USD", "AVG USD"
    );
    for (idx, row) in rows.iter().enumerate() {
        let marker = if row.is_target_token { "*" } else { "" };
        println!(
            "{:<4} {:<10} {:<46} {:>8} {:>14.2} {:>12.2}",
            idx + 1,
            format!("{}{}", row.symbol, marker),
            row.token_address,
            row.holder_count,
            row.total_value_usd,
            row.avg_value_per_holder
        );
    }
}

fn print_clusters(page: &ClusterPage) {
    println!(
        "\n=== CLUSTERS (page {}/{}) ===\n",
        page.current_page, page.total_pages
    );

    if page.clusters.is_empty() {
        println!("No clusters found.");
        return;
    }

    for cluster in &page.clusters {
        println!(
            "{}: {} addresses, {} common tokens, ${:.2} total (${:.2} per address)",
            cluster.id,
            cluster.size(),
            cluster.common_tokens.len(),
            cluster.total_value_usd,
            cluster.avg_value_per_address
        );
        for token in &cluster.token_values {
            let label = if token.symbol.is_empty() {
                token.token_address.as_str()
            } else {
                token.symbol.as_str()
            };
            println!("    {:<12} ${:.2}", label, token.value_usd);
        }
        for address in &cluster.addresses {
            println!("    - {}", address);
        }
        println!();
    }
}

fn print_bucket(bucket: RankBucket, records: &[RankingRecord]) {
    println!("\n=== RANKING: {} ===\n", bucket);

    if records.is_empty() {
        println!("No holders in this bucket.");
        return;
    }

    println!(
        "{:<6} {:<46} {:>6} {:>14} {:>14} {:>8}",
        "RANK", "HOLDER", "POS", "TARGET USD", "PORTFOLIO", "FLAGS"
    );
    for r in records {
        let flags = match (r.is_conspiracy_alpha, r.is_conspiracy_beta) {
            (true, true) => "a+b",
            (true, false) => "a",
            (false, true) => "b",
            (false, false) => "",
        };
        println!(
            "{:<6} {:<46} {:>6} {:>14.2} {:>14.2} {:>8}",
            r.holder_rank,
            r.holder_address,
            r.target_rank.to_string(),
            r.target_value_usd,
            r.portfolio_total_value,
            flags
        );
    }
}

fn print_ranking_stats(stats: &RankingStats) {
    println!("\n=== TARGET RANK DISTRIBUTION ===\n");
    for bucket in &stats.buckets {
        println!(
            "  {:>4}: {:>4} holders  ${:>14.2}  {:>7.3}% supply",
            bucket.bucket.to_string(),
            bucket.holders,
            bucket.value_usd,
            bucket.supply_percentage
        );
    }
    println!(
        "  conspiracy: {} holders  ${:.2}  {:.3}% supply",
        stats.conspiracy.holders, stats.conspiracy.value_usd, stats.conspiracy.supply_percentage
    );
    match (stats.average_rank, stats.median_rank) {
        (Some(avg), Some(median)) => println!(
            "\nTop holders ({}): average rank {:.2}, median rank {:.1}",
            stats.ranked_within_cutoff, avg, median
        ),
        _ => println!("\nNo ranked holders within the detail cutoff."),
    }
}
