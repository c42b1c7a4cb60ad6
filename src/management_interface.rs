//! Server side of the registration feed: one text command per TCP connection.
//!
//! ```text
//! register {"slice_id": "s1", "vlan_configs": [{"vlan_tag": 100, "controller_url": "tcp:host:6633"}]}
//! unregister s1
//! dump
//! ping
//! ```

use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::slice_registry::SliceConfiguration;
use crate::vmoc::Vmoc;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Register(SliceConfiguration),
    Unregister(String),
    Dump,
    Ping,
    Illegal(String),
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, serde_json::Error> {
        let line = line.trim();
        let (verb, rest) = match line.find(char::is_whitespace) {
            Some(i) => (&line[..i], line[i..].trim()),
            None => (line, ""),
        };
        Ok(match verb {
            "register" => Command::Register(serde_json::from_str(rest)?),
            "unregister" if !rest.is_empty() => Command::Unregister(rest.to_string()),
            "dump" => Command::Dump,
            "ping" => Command::Ping,
            _ => Command::Illegal(verb.to_string()),
        })
    }

    /// The line a client sends for this command.
    pub fn to_line(&self) -> String {
        match *self {
            Command::Register(ref config) => match serde_json::to_string(config) {
                Ok(json) => format!("register {}\n", json),
                Err(_) => String::from("ping\n"),
            },
            Command::Unregister(ref slice_id) => format!("unregister {}\n", slice_id),
            Command::Dump => String::from("dump\n"),
            Command::Ping => String::from("ping\n"),
            Command::Illegal(ref verb) => format!("{}\n", verb),
        }
    }
}

/// Runs `line` against `vmoc` and returns the reply, if the command has one.
pub fn execute(vmoc: &Vmoc, line: &str) -> Option<String> {
    let command = match Command::parse(line) {
        Ok(command) => command,
        Err(e) => return Some(format!("Bad slice configuration: {}", e)),
    };
    debug!(?command, "management command");
    match command {
        Command::Register(config) => {
            let slice_id = config.slice_id.clone();
            let verb = if vmoc.registry().is_registered(&config) {
                "Re-registered"
            } else {
                "Registered"
            };
            Some(match vmoc.register_slice(config) {
                Ok(()) => format!("{} slice {}", verb, slice_id),
                Err(e) => e.to_string(),
            })
        }
        Command::Unregister(slice_id) => Some(match vmoc.unregister_slice(&slice_id) {
            Ok(()) => format!("Unregistered slice {}", slice_id),
            Err(e) => e.to_string(),
        }),
        Command::Dump => Some(vmoc.dump()),
        Command::Ping => None,
        Command::Illegal(verb) => Some(format!("Illegal command {}", verb)),
    }
}

fn handle_connection(vmoc: &Vmoc, stream: TcpStream) -> io::Result<()> {
    stream.set_read_timeout(Some(COMMAND_TIMEOUT))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(());
    }
    if let Some(reply) = execute(vmoc, &line) {
        let mut stream = stream;
        stream.write_all(reply.as_bytes())?;
        stream.flush()?;
    }
    Ok(())
}

/// Serves management connections one at a time until the listener fails.
pub fn serve(vmoc: &Vmoc, listener: TcpListener) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "management interface listening");
    }
    for stream in listener.incoming() {
        let result = stream.and_then(|stream| handle_connection(vmoc, stream));
        if let Err(e) = result {
            warn!(error = %e, "management connection failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmocConfig;
    use crate::slice_registry::VlanConfiguration;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("ping\n").unwrap(), Command::Ping);
        assert_eq!(Command::parse("dump").unwrap(), Command::Dump);
        assert_eq!(
            Command::parse("unregister sliceA\n").unwrap(),
            Command::Unregister("sliceA".to_string())
        );
        assert_eq!(
            Command::parse("reboot now").unwrap(),
            Command::Illegal("reboot".to_string())
        );
        assert_eq!(
            Command::parse("unregister").unwrap(),
            Command::Illegal("unregister".to_string())
        );
        let register = Command::parse(
            r#"register {"slice_id": "a", "vlan_configs": [{"vlan_tag": 5, "controller_url": "tcp:h:1"}]}"#,
        )
        .unwrap();
        assert_eq!(
            register,
            Command::Register(SliceConfiguration::new(
                "a",
                vec![VlanConfiguration {
                    vlan_tag: 5,
                    controller_url: Some("tcp:h:1".to_string())
                }]
            ))
        );
        assert_eq!(Command::parse(&register.to_line()).unwrap(), register);
        assert!(Command::parse("register {not json").is_err());
    }

    #[test]
    fn register_fills_default_url_and_unregister_forgets() {
        let vmoc = Vmoc::new(VmocConfig {
            default_controller_url: Some("tcp:127.0.0.1:1".to_string()),
            ..VmocConfig::default()
        });
        let reply = execute(&vmoc, r#"register {"slice_id": "a", "vlan_configs": [{"vlan_tag": 7}]}"#);
        assert_eq!(reply.as_deref(), Some("Registered slice a"));
        assert!(vmoc.registry().maps(7, "tcp:127.0.0.1:1"));
        let reply = execute(&vmoc, r#"register {"slice_id": "a", "vlan_configs": [{"vlan_tag": 8}]}"#);
        assert_eq!(reply.as_deref(), Some("Re-registered slice a"));
        assert!(vmoc.registry().maps(8, "tcp:127.0.0.1:1"));
        assert!(vmoc.registry().lookup_by_vlan(7).is_none());
        let reply = execute(&vmoc, r#"register {"slice_id": "a", "vlan_configs": [{"vlan_tag": 7}]}"#);
        assert_eq!(reply.as_deref(), Some("Re-registered slice a"));

        let reply = execute(&vmoc, r#"register {"slice_id": "b", "vlan_configs": [{"vlan_tag": 7}]}"#);
        assert_eq!(
            reply.as_deref(),
            Some("VLAN 7 already owned by slice a, cannot assign to b")
        );

        assert_eq!(execute(&vmoc, "unregister a").as_deref(), Some("Unregistered slice a"));
        assert!(vmoc.registry().lookup_by_vlan(7).is_none());
        assert_eq!(
            execute(&vmoc, "unregister a").as_deref(),
            Some("slice a is not registered")
        );
        assert_eq!(execute(&vmoc, "ping"), None);
        assert_eq!(execute(&vmoc, "frobnicate").as_deref(), Some("Illegal command frobnicate"));
    }
}
