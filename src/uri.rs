use crate::session::{ConnectParams, Session};

/// Connection identifier for a session, or `None` when there is no session.
pub fn build_uri(session: Option<&Session>) -> Option<String> {
    session.map(|s| connection_uri(&s.connection))
}

/// `qemu:///system` for the local control plane, otherwise
/// `protocol://[user@]host[:port]/path`.
pub fn connection_uri(params: &ConnectParams) -> String {
    if params.protocol.is_local() {
        return format!("{}:///{}", params.protocol, params.path);
    }

    let mut uri = format!("{}://", params.protocol);
    if let Some(user) = &params.user {
        uri.push_str(user);
        uri.push('@');
    }
    if let Some(host) = &params.host {
        uri.push_str(host);
    }
    if let Some(port) = params.port {
        uri.push(':');
        uri.push_str(&port.to_string());
    }
    uri.push('/');
    uri.push_str(params.path.as_str());
    uri
}

/// What downstream calls receive instead of the session itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub uri: String,
    pub params: ConnectParams,
}

impl Connection {
    pub fn from_session(session: &Session) -> Self {
        Self::from_params(session.connection.clone())
    }

    pub fn from_params(params: ConnectParams) -> Self {
        Self {
            uri: connection_uri(&params),
            params,
        }
    }
}
