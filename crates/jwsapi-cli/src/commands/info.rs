//! Gateway info command.

use clap::Args;
use jwsapi_client::Connection;
use jwsapi_core::ClientConfig;

/// Info command arguments.
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Print compact JSON instead of pretty-printed
    #[arg(long)]
    pub compact: bool,
}

/// Connect, ask the gateway to describe itself and print the reply.
pub async fn run(config: ClientConfig, args: InfoArgs) -> anyhow::Result<()> {
    let connect_budget = config.dial_timeout() + config.request_timeout();
    let conn = Connection::open(config);
    conn.wait_connected(connect_budget).await?;

    let info = conn.info().await;
    conn.close();
    let info = info?;

    if args.compact {
        println!("{}", info);
    } else {
        println!("{}", serde_json::to_string_pretty(&info)?);
    }
    Ok(())
}
