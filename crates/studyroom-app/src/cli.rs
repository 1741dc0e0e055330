use clap::{Parser, Subcommand};

/// Study room: live video and chat for a tutoring room.
#[derive(Parser, Debug)]
#[command(name = "studyroom", version, about)]
pub struct Args {
    /// Config file path override.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Log level override (debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Join a room over the Supabase relay.
    Join {
        /// Room identifier.
        room: String,

        /// Participant id; a random guest id when omitted.
        #[arg(long)]
        user_id: Option<String>,

        /// Display name shown as the chat author.
        #[arg(long, default_value = "Guest")]
        name: String,
    },

    /// Run several participants in one process over an in-memory relay.
    Demo {
        /// Number of participants.
        #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(2..=8))]
        peers: u8,

        /// Room identifier.
        #[arg(long, default_value = "demo-room")]
        room: String,
    },

    /// Print the effective configuration as JSON.
    Config,
}

pub fn parse() -> Args {
    Args::parse()
}
