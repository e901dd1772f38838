use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use gatelink::shared::{OutputChannel, SlotFeature};
use gatelink::{DeviceCommands, DeviceTarget, EngineConfig, EngineError, Orchestrator};
use gatelink::transport::SimulatedController;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "gatelink", version, about = "Run gate controller commands against a simulated device")]
struct Cli {
    /// Phone number of the controller
    #[arg(short, long, default_value = "+15550100")]
    address: String,

    /// Device password
    #[arg(short, long, default_value = "1234")]
    password: String,

    /// Seconds to wait for the device (0 waits forever)
    #[arg(short, long, default_value = "60")]
    timeout: u64,

    /// Simulated reply latency in milliseconds
    #[arg(long, default_value = "250")]
    reply_delay_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the gate
    Open,
    /// Change the device password
    ChangePassword { new_password: String },
    /// Set the device timezone code
    SetTimezone { code: String },
    /// Read GSM signal strength
    Rssi,
    /// Read an output's configured name
    OutputName {
        #[arg(value_enum)]
        output: OutputArg,
    },
    /// Find the next free slot in a list
    FreeSlot {
        #[arg(value_enum)]
        feature: FeatureArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputArg {
    #[value(name = "1")]
    One,
    #[value(name = "2")]
    Two,
}

impl From<OutputArg> for OutputChannel {
    fn from(arg: OutputArg) -> Self {
        match arg {
            OutputArg::One => OutputChannel::One,
            OutputArg::Two => OutputChannel::Two,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FeatureArg {
    CallerId,
    Relay1,
    Relay2,
    Delivery,
}

impl From<FeatureArg> for SlotFeature {
    fn from(arg: FeatureArg) -> Self {
        match arg {
            FeatureArg::CallerId => SlotFeature::CallerId,
            FeatureArg::Relay1 => SlotFeature::Relay1Code,
            FeatureArg::Relay2 => SlotFeature::Relay2Code,
            FeatureArg::Delivery => SlotFeature::DeliveryCode,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = EngineConfig::default().with_reply_timeout(match cli.timeout {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    });

    let controller = SimulatedController::new(&cli.address, &cli.password)
        .with_reply_delay(Duration::from_millis(cli.reply_delay_ms))
        .with_output_name(OutputChannel::One, "Front gate")
        .with_output_name(OutputChannel::Two, "Pedestrian door");

    info!("GateLink starting: {} via simulated controller", cli.address);
    info!("  Reply timeout: {:?}", config.reply_timeout);

    let orchestrator = Arc::new(Orchestrator::new(Arc::new(controller), config));
    let mut device = DeviceCommands::new(
        orchestrator.clone(),
        DeviceTarget::new(&cli.address, &cli.password),
    );

    let result = match cli.command {
        Command::Open => device.open_gate().await.map(|_| "gate opened".to_string()),
        Command::ChangePassword { new_password } => device
            .change_password(&new_password)
            .await
            .map(|_| "password changed".to_string()),
        Command::SetTimezone { code } => device
            .set_timezone(&code)
            .await
            .map(|_| format!("timezone set to {}", code)),
        Command::Rssi => device
            .read_signal_strength()
            .await
            .map(|v| describe(v.map(|n| n.to_string()))),
        Command::OutputName { output } => device
            .read_output_name(output.into())
            .await
            .map(describe),
        Command::FreeSlot { feature } => device
            .find_free_slot(feature.into())
            .await
            .map(describe),
    };

    orchestrator.correlator().shutdown();

    match result {
        Ok(message) => {
            println!("{}", message);
            Ok(())
        }
        Err(EngineError::Cancelled) => Ok(()),
        Err(e) => {
            error!("Command failed: {}", e);
            Err(e.into())
        }
    }
}

fn describe(value: Option<String>) -> String {
    value.unwrap_or_else(|| "not reported by device".to_string())
}
