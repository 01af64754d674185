use std::io::Write;
use std::time::Duration;

use tracing::{info, warn};

use super::{recover, Context};

/// Run the `patrol` subcommand: sweep for orphans every `interval` until
/// Ctrl-C.
pub async fn run(ctx: &Context, interval: Duration, out: &mut impl Write) -> anyhow::Result<()> {
    info!(interval_secs = interval.as_secs(), "patrol started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = match recover::run(ctx, false, out) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %format!("{e:#}"), "patrol sweep failed");
                        continue;
                    }
                };
                if !report.orphaned.is_empty() {
                    info!(orphaned = report.orphaned.len(), "patrol recovered tasks");
                }
                out.flush()?;
            }
            _ = &mut shutdown => {
                info!("patrol stopped");
                return Ok(());
            }
        }
    }
}
