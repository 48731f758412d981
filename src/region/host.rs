use std::fmt;

/// HostIdentity names the node that hosts a replica. `start_code` distinguishes two incarnations
/// of the same host:port, so a restarted node never looks like its previous self.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct HostIdentity {
    pub name: String,
    pub port: u16,
    pub start_code: i64,
}

impl HostIdentity {
    pub fn new(name: impl Into<String>, port: u16, start_code: i64) -> Self {
        HostIdentity {
            name: name.into(),
            port,
            start_code,
        }
    }
}

impl fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.name, self.port, self.start_code)
    }
}
