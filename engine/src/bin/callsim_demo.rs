//! A small CLI that drives the simulator end to end: provisions a
//! subaccount and a number, points it at a scripted webhook, places one
//! call, and prints the resulting timeline. Logging setup mirrors
//! `call_sim-cli`'s `fern::Dispatch` (just swapped for a plain
//! stdout/file chain, since there is no WebRTC logger to bridge here).

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use fern::Dispatch;
use log::{info, LevelFilter};

use callml::HttpMethod;
use engine::{Engine, ReqwestWebhookClient, UuidSidFactory, WallClock};
use engine::params::{CreateApplicationParams, CreateCallParams, ProvisionNumberParams};

#[derive(Parser, Debug)]
struct Args {
    /// Number to dial.
    #[arg(long, default_value = "+15551230000")]
    to: String,

    /// Caller id to dial from.
    #[arg(long, default_value = "+15550000001")]
    from: String,

    /// The CallML webhook that answers the voice URL.
    #[arg(long, default_value = "https://example.test/voice")]
    voice_url: String,

    /// If set, write logs here instead of stdout.
    #[arg(long)]
    log_file: Option<String>,
}

fn init_logging(log_file: Option<String>) -> Result<()> {
    let dispatch = Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}:{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.line().unwrap_or(0),
                message
            ))
        })
        .level(LevelFilter::Info);

    if let Some(path) = log_file {
        dispatch.chain(fern::log_file(path)?).apply()?;
    } else {
        dispatch.chain(std::io::stdout()).apply()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_file)?;

    let config = engine::config::load()?;
    info!("starting callsim-demo with config {config:?}");

    let clock = Arc::new(WallClock);
    let webhook = Arc::new(ReqwestWebhookClient::new(config.webhook_deadline));
    let sids = Arc::new(UuidSidFactory);
    let engine = Engine::new(clock, webhook, sids, config);

    let tenant = engine.create_subaccount("demo", "demo-auth-token");

    let application = tenant.create_application(CreateApplicationParams {
        friendly_name: "demo app".to_string(),
        voice_url: args.voice_url.clone(),
        voice_method: HttpMethod::Post,
        status_callback: None,
        status_callback_method: HttpMethod::Post,
    });
    tenant.provision_number(ProvisionNumberParams {
        phone_number: args.to.clone(),
        application_sid: Some(application.sid.clone()),
    });

    let call = tenant
        .create_call(CreateCallParams {
            from: args.from,
            to: args.to,
            url: args.voice_url,
            method: HttpMethod::Post,
            status_callback: None,
            status_callback_method: HttpMethod::Post,
            status_callback_events: vec![],
        })
        .await?;
    info!("placed call {}", call.sid);

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let snapshot = tenant.snapshot();
    for call in &snapshot.calls {
        info!("call {} is now {}", call.sid, call.status);
        for entry in call.timeline.entries() {
            info!("  {} {:?}", entry.event, entry.detail);
        }
    }

    engine.shutdown().await;
    Ok(())
}
