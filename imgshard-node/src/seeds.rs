use std::time::Duration;

use tokio::net::lookup_host;
use tracing::{info, warn};

use crate::error::NodeError;

/// How long to wait before resolving the seed list a second time.
///
/// Nodes of a deployment usually start together, so the seeds' host names
/// may not be registered with the resolver when the first attempt is made.
pub const SEED_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Adds the default gossip port to seeds which have none.
pub(crate) fn normalise_seeds(seeds: &[String], default_port: u16) -> Vec<String> {
    seeds
        .iter()
        .map(|seed| seed.trim())
        .filter(|seed| !seed.is_empty())
        .map(|seed| {
            if has_port(seed) {
                seed.to_string()
            } else {
                format!("{}:{}", seed, default_port)
            }
        })
        .collect()
}

fn has_port(seed: &str) -> bool {
    if let Some(rest) = seed.strip_prefix('[') {
        // Bracketed IPv6, `[::1]:7946`.
        return rest.contains("]:");
    }

    match seed.rsplit_once(':') {
        Some((host, port)) => !host.contains(':') && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// Checks the seeds resolve, retrying exactly once after `backoff`.
///
/// Seeds which still fail to resolve are kept, chitchat resolves them again on
/// every gossip round. Only when none of them resolves is the join aborted.
pub(crate) async fn resolve_seeds(
    seeds: Vec<String>,
    backoff: Duration,
) -> Result<Vec<String>, NodeError> {
    if seeds.is_empty() {
        info!("No seed nodes provided, starting a new cluster.");
        return Ok(seeds);
    }

    let mut unresolved = unresolvable_seeds(&seeds).await;
    if unresolved.is_empty() {
        return Ok(seeds);
    }

    warn!(
        unresolved = %unresolved.join(", "),
        backoff = ?backoff,
        "Some seed nodes could not be resolved, retrying after backoff."
    );
    tokio::time::sleep(backoff).await;

    unresolved = unresolvable_seeds(&seeds).await;
    if unresolved.len() == seeds.len() {
        return Err(NodeError::SeedsUnresolvable(unresolved));
    }

    if !unresolved.is_empty() {
        warn!(
            unresolved = %unresolved.join(", "),
            "Continuing with partially resolvable seed list."
        );
    }

    Ok(seeds)
}

async fn unresolvable_seeds(seeds: &[String]) -> Vec<String> {
    let mut unresolved = Vec::new();
    for seed in seeds {
        let resolved = match lookup_host(seed.as_str()).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(_) => false,
        };

        if !resolved {
            unresolved.push(seed.clone());
        }
    }
    unresolved
}
