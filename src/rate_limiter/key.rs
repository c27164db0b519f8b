//! Identity extraction for rate-limit keys

use crate::events::SecurityRequest;

/// Derives the identity part of a rate-limit key from a request
pub trait KeyGenerator: Send + Sync {
    fn identity(&self, request: &SecurityRequest) -> String;
}

/// `ip:path:userId`, with `anonymous` standing in for a missing user
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyGenerator;

impl KeyGenerator for DefaultKeyGenerator {
    fn identity(&self, request: &SecurityRequest) -> String {
        format!(
            "{}:{}:{}",
            request.ip,
            request.path,
            request.user_id.as_deref().unwrap_or("anonymous")
        )
    }
}

/// Client IP only; every path shares one quota
#[derive(Debug, Clone, Copy, Default)]
pub struct IpKeyGenerator;

impl KeyGenerator for IpKeyGenerator {
    fn identity(&self, request: &SecurityRequest) -> String {
        request.ip.clone()
    }
}

/// Authenticated user when known, otherwise the client IP
#[derive(Debug, Clone, Copy, Default)]
pub struct UserOrIpKeyGenerator;

impl KeyGenerator for UserOrIpKeyGenerator {
    fn identity(&self, request: &SecurityRequest) -> String {
        match &request.user_id {
            Some(user) => format!("user:{}", user),
            None => format!("ip:{}", request.ip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_key_includes_path_and_user() {
        let request = SecurityRequest::new("GET", "/api/docs", "10.1.1.1");
        assert_eq!(DefaultKeyGenerator.identity(&request), "10.1.1.1:/api/docs:anonymous");

        let request = request.with_user_id("carol");
        assert_eq!(DefaultKeyGenerator.identity(&request), "10.1.1.1:/api/docs:carol");
    }

    #[test]
    fn test_alternative_generators() {
        let request = SecurityRequest::new("GET", "/a", "10.1.1.1");
        assert_eq!(IpKeyGenerator.identity(&request), "10.1.1.1");
        assert_eq!(UserOrIpKeyGenerator.identity(&request), "ip:10.1.1.1");
        assert_eq!(
            UserOrIpKeyGenerator.identity(&request.with_user_id("dan")),
            "user:dan"
        );
    }
}
