/// The six operating modes of a fabric link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Publish,
    Subscribe,
    Push,
    Pull,
    RpcServe,
    RpcCall,
}

impl LinkRole {
    /// Whether this role binds its address (the other roles connect).
    pub fn binds(self) -> bool {
        matches!(self, LinkRole::Publish | LinkRole::Pull | LinkRole::RpcServe)
    }
}

impl std::fmt::Display for LinkRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LinkRole::Publish => "publish",
            LinkRole::Subscribe => "subscribe",
            LinkRole::Push => "push",
            LinkRole::Pull => "pull",
            LinkRole::RpcServe => "rpc-serve",
            LinkRole::RpcCall => "rpc-call",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_direction_per_role() {
        assert!(LinkRole::Publish.binds());
        assert!(LinkRole::Pull.binds());
        assert!(LinkRole::RpcServe.binds());
        assert!(!LinkRole::Subscribe.binds());
        assert!(!LinkRole::Push.binds());
        assert!(!LinkRole::RpcCall.binds());
    }
}
