mod workers;

use framedrop::core::protocol::origin::frame_url;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use workers::args::{frame_url_settings, Args, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (args, file_config, skipped_config) = Args::load();

    let filter = match args.verbose {
        0 => "warn,framedrop=info",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // RUST_LOG, when set, overrides the verbosity flags.
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(e) = skipped_config {
        warn!(event = "config_ignored", error = %format!("{e:#}"), "Ignoring configuration file");
    }

    match args.command {
        Command::Send(send) => workers::transfer::run(send.merge(&file_config)).await,
        Command::FrameUrl {
            frame_url: url,
            parent_origin,
        } => {
            let (url, origin) = frame_url_settings(url, parent_origin, &file_config);
            println!("{}", frame_url(&url, &origin));
            Ok(())
        }
    }
}
