use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "sentry-recorder")]
#[command(about = "Ignition and sentry-mode recorder for a vehicle camera", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Recover pending conversions, then record until interrupted (default)
    Run,
    /// Convert recordings left over by a previous run and exit
    Recover,
    /// Evict retained videos until storage is under the ceiling
    EnforceQuota,
    /// Print configuration values
    PrintConfig,
    /// Print the contents of every itinerary
    PrintQueues,
    /// Move failed recordings back to the conversion itinerary and retry them
    RetryFailed,
    /// Forget failed recordings, leaving their raw files on disk
    ClearFailed,
    /// Drive the pan motor back to its neutral angle
    CenterMotor,
}
