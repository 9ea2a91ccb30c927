/// Allow-list check on the handshake's `Origin` header.
///
/// Fail-closed: an empty list admits nobody.
#[derive(Debug, Clone, Default)]
pub struct OriginGate {
    allowed: Vec<String>,
}

impl OriginGate {
    pub fn new(allowed: Vec<String>) -> Self {
        let allowed = allowed
            .into_iter()
            .map(|origin| normalize(&origin).to_string())
            .filter(|origin| {
                if origin.is_empty() {
                    tracing::warn!("Ignoring empty allowed origin");
                }
                !origin.is_empty()
            })
            .collect();
        Self { allowed }
    }

    pub fn allowed(&self, origin: &str) -> bool {
        let origin = normalize(origin);
        self.allowed.iter().any(|allowed| allowed == origin)
    }

    pub fn origins(&self) -> &[String] {
        &self.allowed
    }
}

/// Drops surrounding whitespace and at most one trailing slash.
fn normalize(origin: &str) -> &str {
    let origin = origin.trim();
    origin.strip_suffix('/').unwrap_or(origin)
}
