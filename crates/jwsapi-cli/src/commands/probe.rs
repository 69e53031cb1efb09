//! End-to-end probe: create a session, attach a plugin, optionally send it a
//! message, print whatever the gateway pushes, then clean up.

use clap::Args;
use console::{style, Emoji};
use jwsapi_client::{Connection, Handle, Message, Notification, Session};
use jwsapi_core::ClientConfig;
use std::time::Duration;

static CHECK: Emoji = Emoji("✓", "+");
static CROSS: Emoji = Emoji("✗", "x");

/// Probe command arguments.
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Plugin to attach
    #[arg(short, long, default_value = "janus.plugin.echotest")]
    pub plugin: String,

    /// Opaque id to tag the handle with
    #[arg(long)]
    pub opaque_id: Option<String>,

    /// JSON body to send to the plugin after attaching
    #[arg(short, long)]
    pub body: Option<String>,

    /// Expect a synchronous plugin reply instead of an acknowledgement and event
    #[arg(long)]
    pub sync: bool,

    /// Seconds to keep listening for events
    #[arg(short, long, default_value_t = 5)]
    pub duration: u64,
}

/// Parse a `--body` argument into a message.
pub fn parse_body(raw: &str) -> anyhow::Result<Message> {
    Message::from_json(raw).map_err(|e| anyhow::anyhow!("Invalid --body JSON: {}", e))
}

/// Run the probe command.
pub async fn run(config: ClientConfig, args: ProbeArgs) -> anyhow::Result<()> {
    let body = args.body.as_deref().map(parse_body).transpose()?;
    let url = config.url.clone();
    let connect_budget = config.dial_timeout() + config.request_timeout();

    let conn = Connection::open(config);
    conn.wait_connected(connect_budget).await?;
    println!("{} Connected to {}", style(CHECK).green(), url);

    let session = conn.create().await?;
    println!("{} Session {}", style(CHECK).green(), session.id());

    let result = probe_session(&session, &args, body).await;

    match session.destroy().await {
        Ok(()) => println!("{} Session {} destroyed", style(CHECK).green(), session.id()),
        Err(e) => println!("{} Destroy failed: {}", style(CROSS).red(), e),
    }
    conn.close();
    result
}

async fn probe_session(
    session: &Session,
    args: &ProbeArgs,
    body: Option<Message>,
) -> anyhow::Result<()> {
    let handle = match &args.opaque_id {
        Some(opaque_id) => session.attach_with_opaque_id(&args.plugin, opaque_id).await?,
        None => session.attach(&args.plugin).await?,
    };
    println!(
        "{} Attached {} as handle {}",
        style(CHECK).green(),
        args.plugin,
        handle.id()
    );

    let result = listen(&handle, args, body).await;

    if let Err(e) = handle.detach().await {
        println!("{} Detach failed: {}", style(CROSS).red(), e);
    }
    result
}

async fn listen(handle: &Handle, args: &ProbeArgs, body: Option<Message>) -> anyhow::Result<()> {
    for notification in Notification::ALL {
        handle.set_callback(notification, move |msg| {
            println!("  {} {}", style(notification).cyan(), msg);
        });
    }
    let mut events = handle
        .events()
        .ok_or_else(|| anyhow::anyhow!("Event stream already taken"))?;

    if let Some(body) = body {
        let reply = if args.sync {
            handle.request(body).await?
        } else {
            handle.message(body).await?
        };
        println!("  {} {}", style("reply").bold(), reply);
    }

    println!("Listening for {}s (Ctrl-C to stop)...", args.duration);
    let deadline = tokio::time::sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(event) => println!("  {} {}", style("event").yellow(), event),
                None => break,
            },
        }
    }
    Ok(())
}
