use serde::{Deserialize, Serialize};

/// A serialised descriptor that uniquely identifies whoever holds a lock
/// (§4.3): a local process's identity, or a remote caller's session id.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Holder {
    Local {
        pid: u32,
        start_time: u64,
        boot_id: String,
        command: String,
    },
    Remote {
        session_id: String,
    },
}

impl Holder {
    pub fn local(
        identity: &dyn process_identity::ProcessIdentity,
        command: impl Into<String>,
    ) -> Holder {
        let pid = identity.current_pid();
        let start_time = identity.start_time(pid).unwrap_or(0);
        Holder::Local {
            pid,
            start_time,
            boot_id: identity.boot_id(),
            command: command.into(),
        }
    }

    pub fn remote(session_id: impl Into<String>) -> Holder {
        Holder::Remote {
            session_id: session_id.into(),
        }
    }
}

impl std::fmt::Display for Holder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Holder::Local {
                pid,
                command,
                ..
            } => write!(f, "local process {pid} ({command})"),
            Holder::Remote { session_id } => write!(f, "remote session {session_id}"),
        }
    }
}
