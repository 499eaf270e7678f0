//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use resilient_cam::CameraName;

/// Demo of resilient logical cameras on a simulated camera stack
#[derive(Parser, Debug)]
#[command(name = "resilient-cam")]
#[command(version, about = "Hot-plug resilient cameras on a simulated backend", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Log state transitions and rebinding
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream from one webcam while it is unplugged and replugged
    Webcam {
        /// USB serial number of the simulated webcam
        #[arg(long, default_value = "SIM0001")]
        serial: String,

        /// How long to stream
        #[arg(long, default_value = "5", value_parser = parse_seconds)]
        seconds: u64,

        /// Unplug period in milliseconds (0 keeps the device plugged)
        #[arg(long, default_value = "1000")]
        unplug_every: u64,
    },
    /// Stream from a switchable group while rotating the active member
    Switchable {
        /// Members: `usb:SERIAL` for webcams, anything else is a built-in id
        #[arg(long, value_delimiter = ',', default_value = "front,back", value_parser = parse_camera_name)]
        members: Vec<CameraName>,

        /// How long to stream
        #[arg(long, default_value = "5", value_parser = parse_seconds)]
        seconds: u64,

        /// Rotation period in milliseconds (0 never switches)
        #[arg(long, default_value = "1000")]
        switch_every: u64,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,
}

/// Parse a member name (`usb:SERIAL` or a built-in camera id)
fn parse_camera_name(s: &str) -> Result<CameraName, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Camera name must not be empty".to_string());
    }
    match s.strip_prefix("usb:") {
        Some("") => Err(format!("'{}' is missing a serial number", s)),
        Some(serial) => Ok(CameraName::webcam(serial)),
        None => Ok(CameraName::builtin(s)),
    }
}

/// Parse and validate a run length (1-3600 s)
fn parse_seconds(s: &str) -> Result<u64, String> {
    let secs: u64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number of seconds", s))?;
    if !(1..=3600).contains(&secs) {
        return Err(format!("Duration must be between 1 and 3600 s, got {}", secs));
    }
    Ok(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webcam_defaults() {
        let args = Args::parse_from(["resilient-cam", "webcam"]);
        assert!(args.config.is_none());
        assert!(!args.verbose);
        match args.command {
            Command::Webcam {
                serial,
                seconds,
                unplug_every,
            } => {
                assert_eq!(serial, "SIM0001");
                assert_eq!(seconds, 5);
                assert_eq!(unplug_every, 1000);
            }
            other => panic!("Expected Webcam subcommand, got {:?}", other),
        }
    }

    #[test]
    fn test_switchable_members() {
        let args = Args::parse_from([
            "resilient-cam",
            "switchable",
            "--members",
            "front,usb:ABC",
            "--switch-every",
            "250",
        ]);
        match args.command {
            Command::Switchable {
                members,
                switch_every,
                ..
            } => {
                assert_eq!(
                    members,
                    vec![CameraName::builtin("front"), CameraName::webcam("ABC")]
                );
                assert_eq!(switch_every, 250);
            }
            other => panic!("Expected Switchable subcommand, got {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from([
            "resilient-cam",
            "config",
            "show",
            "--verbose",
            "--config",
            "/tmp/cam.toml",
        ]);
        assert!(args.verbose);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/cam.toml")));
        assert!(matches!(
            args.command,
            Command::Config {
                action: ConfigAction::Show
            }
        ));
    }

    #[test]
    fn test_parse_camera_name() {
        assert_eq!(parse_camera_name("usb:1234"), Ok(CameraName::webcam("1234")));
        assert_eq!(parse_camera_name(" rear "), Ok(CameraName::builtin("rear")));
        assert!(parse_camera_name("usb:").is_err());
        assert!(parse_camera_name("").is_err());
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("10"), Ok(10));
        assert!(parse_seconds("0").is_err());
        assert!(parse_seconds("4000").is_err());
        assert!(parse_seconds("abc").is_err());
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Args::try_parse_from(["resilient-cam"]).is_err());
    }
}
