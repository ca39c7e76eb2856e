use clap::{Parser, Subcommand};

/// booth-notifier: realtime notifications for the photobooth platform
#[derive(Parser)]
#[command(name = "booth-notifier", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP + WebSocket server
    Serve {
        /// Port to bind (overrides BOOTH_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Deliver a single notification
    Notify {
        #[arg(long)]
        recipient: String,
        /// One of: frame_like, frame_use, frame_approved, frame_rejected,
        /// new_follower, followee_upload, system, birthday, broadcast
        #[arg(long, default_value = "system")]
        kind: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        message: String,
        /// Defaults to the recipient (system-authored)
        #[arg(long)]
        sender: Option<String>,
    },

    /// Broadcast one message to an explicit list of users
    Broadcast {
        #[arg(long, value_delimiter = ',', required = true)]
        recipients: Vec<String>,
        #[arg(long)]
        title: String,
        #[arg(long)]
        message: String,
        #[arg(long, default_value = "system")]
        sender: String,
        #[arg(long)]
        expires_in_hours: Option<i64>,
    },

    /// Print a user's unread count
    Unread {
        #[arg(long)]
        user: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_recipients_split_on_comma() {
        let cli = Cli::try_parse_from([
            "booth-notifier",
            "broadcast",
            "--recipients",
            "a,b,c",
            "--title",
            "Maintenance",
            "--message",
            "Back soon",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Broadcast { recipients, sender, .. }) => {
                assert_eq!(recipients, vec!["a", "b", "c"]);
                assert_eq!(sender, "system");
            }
            _ => panic!("expected broadcast"),
        }
    }

    #[test]
    fn test_no_subcommand_is_allowed() {
        let cli = Cli::try_parse_from(["booth-notifier"]).unwrap();
        assert!(cli.command.is_none());
    }
}
