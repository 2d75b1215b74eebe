use std::path::PathBuf;
use std::time::Duration;

use ansi_term::Colour;
use clap::{Args, Parser, Subcommand};
use iothub_probe::prelude::*;

#[derive(Parser)]
#[command(version = "1.0", author = "Felix Watts", about = "Send or receive one message through an IoT hub device endpoint.")]
struct Cli {
    /// JSON file providing defaults for every field below
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Forcibly close the client after this many milliseconds
    #[arg(short, long)]
    timeout_ms: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Send {
        #[command(flatten)]
        connect: ConnectArgs,
        #[arg(short, long)]
        message: Option<String>,
    },
    Receive {
        #[command(flatten)]
        connect: ConnectArgs,
        /// Cloud-to-device messages for the simulated hub to deliver
        #[arg(long)]
        c2d: Vec<String>,
    },
}

#[derive(Args)]
struct ConnectArgs {
    #[arg(long)]
    hub: Option<String>,
    #[arg(long)]
    device: Option<String>,
    #[arg(long)]
    key: Option<String>,
    /// https or amqps
    #[arg(short, long)]
    protocol: Option<String>,
    /// The key the simulated hub knows the device by, if different from --key
    #[arg(long)]
    registered_key: Option<String>,
    /// Make the simulated hub unreachable
    #[arg(long)]
    offline: bool,
}

impl ConnectArgs {
    fn apply(&self, fields: &mut iothub_probe::InputFields) {
        if let Some(hub) = &self.hub {
            fields.hub_id = hub.clone();
        }
        if let Some(device) = &self.device {
            fields.device_id = device.clone();
        }
        if let Some(key) = &self.key {
            fields.device_key = key.clone();
        }
        if self.protocol.is_some() {
            fields.protocol = self.protocol.clone();
        }
    }

    fn hub(&self, params: &ConnectionParameters) -> MemoryHub {
        let hub = MemoryHub::new(&params.hub_id);
        let key = self.registered_key.as_deref().unwrap_or(&params.device_key);
        hub.register_device(&params.device_id, key);
        hub.set_offline(self.offline);
        hub
    }
}

/// Prints each report on its own labelled line.
struct StdoutReporter;

impl ResultReporter for StdoutReporter {
    fn report(&self, channel: Channel, text: &str) {
        let label = match channel {
            Channel::Send => Colour::Blue.bold().paint("send   "),
            Channel::Receive => Colour::Green.bold().paint("receive"),
        };
        println!("{} {}", label, text);
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        println!("{}", &e.to_string());
    }
}

async fn run() -> ProbeResult<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ProbeConfig::load(path)?,
        None => ProbeConfig::default(),
    };
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    config.validate()?;

    match &cli.command {
        Commands::Send { connect, message } => {
            connect.apply(&mut config.fields);
            if let Some(message) = message {
                config.fields.message = message.clone();
            }
            let params = config.fields.connection_parameters();
            let probe = Probe::with_config(connect.hub(&params), StdoutReporter, &config);

            let mut task = probe.send(params, &config.fields.payload());
            task.wait_for_state(|s| s == OperationState::CallbackReceived || s.is_terminal()).await?;
            task.stop().await?;
        },
        Commands::Receive { connect, c2d } => {
            connect.apply(&mut config.fields);
            let params = config.fields.connection_parameters();
            let hub = connect.hub(&params);
            let probe = Probe::with_config(hub.clone(), StdoutReporter, &config);

            let mut task = probe.receive(params.clone());
            for text in c2d {
                if let Err(e) = hub.send_to_device(&params.device_id, Message::new(text.clone())) {
                    println!("{}", &e.to_string());
                }
            }

            println!("Listening for {:?}, Ctrl-C to stop early", Duration::from_millis(config.timeout_ms));
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                result = task.wait_for_state(|s| s.is_terminal()) => { result?; }
            }
            task.stop().await?;
        },
    }

    Ok(())
}
