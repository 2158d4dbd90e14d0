use chrono::{DateTime, FixedOffset, Utc};
use env_logger::Builder;
use log::LevelFilter;
use ratio_hedge::config::TraderConfig;
use ratio_hedge::ports::replay_feed::ReplayFeed;
use ratio_hedge::session::TradingSession;
use ratio_hedge::trade::execution::paper_gateway::PaperGateway;
use std::env;
use std::io::Write;
use std::str::FromStr;

const DEFAULT_TIMEZONE_OFFSET_SECS: i32 = 3600;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with local timezone
    let offset_seconds = env::var("TIMEZONE_OFFSET")
        .ok()
        .and_then(|v| v.parse::<i32>().ok())
        .unwrap_or(DEFAULT_TIMEZONE_OFFSET_SECS);
    let offset = FixedOffset::east_opt(offset_seconds)
        .or_else(|| FixedOffset::east_opt(DEFAULT_TIMEZONE_OFFSET_SECS))
        .ok_or_else(|| anyhow::anyhow!("invalid TIMEZONE_OFFSET {}", offset_seconds))?;
    Builder::from_default_env()
        .format(move |buf, record| {
            let utc_now: DateTime<Utc> = Utc::now();
            let local_now = utc_now.with_timezone(&offset);
            writeln!(
                buf,
                "{} [{}] - {}",
                local_now.format("%Y-%m-%dT%H:%M:%S%z"),
                record.level(),
                record.args()
            )
        })
        .filter(
            None,
            LevelFilter::from_str(&env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
                .unwrap_or(LevelFilter::Debug),
        )
        .init();

    let git_hash = option_env!("RATIO_HEDGE_GIT_HASH").unwrap_or("unknown");
    log::info!("ratio-hedge git: {}", git_hash);

    let cfg = TraderConfig::from_env_or_yaml()?;
    let feed = ReplayFeed::new(cfg.replay_file()?)?;
    let gateway = PaperGateway::new(cfg.maker_fee_bps, cfg.taker_fee_bps);

    log::info!("Starting replay session...");
    let mut session = TradingSession::new(cfg, feed, gateway);
    let summary = session.run().await?;
    log::info!(
        "final position: primary={} hedge={}",
        summary.primary_position,
        summary.hedge_position
    );
    Ok(())
}
