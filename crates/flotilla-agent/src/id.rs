use std::str::FromStr;

use crate::error::AgentError;

macro_rules! define_id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id_type!(SlaveId);
define_id_type!(FrameworkId);
define_id_type!(ExecutorId);
define_id_type!(TaskId);

/// The address of a peer endpoint (`host:port`). The master, each framework
/// scheduler, and each registered executor are all addressed by a pid.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Pid {
    host: String,
    port: u16,
}

impl Pid {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn to_url_string(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl FromStr for Pid {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((host, port)) = s.rsplit_once(':') else {
            return Err(AgentError::InvalidArgument(format!("invalid pid: {s}")));
        };
        if host.is_empty() {
            return Err(AgentError::InvalidArgument(format!("invalid pid: {s}")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| AgentError::InvalidArgument(format!("invalid pid port: {s}")))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_round_trip() {
        let pid: Pid = "worker-3.example.com:5051".parse().unwrap();
        assert_eq!(pid.host(), "worker-3.example.com");
        assert_eq!(pid.port(), 5051);
        assert_eq!(pid.to_string(), "worker-3.example.com:5051");
        assert_eq!(pid.to_url_string(), "http://worker-3.example.com:5051");
    }

    #[test]
    fn test_pid_rejects_malformed_addresses() {
        assert!("".parse::<Pid>().is_err());
        assert!("no-port".parse::<Pid>().is_err());
        assert!(":5051".parse::<Pid>().is_err());
        assert!("host:notaport".parse::<Pid>().is_err());
    }
}
