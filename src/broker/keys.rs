/// Store keys derived from a stream id.
///
/// Every component that touches the store derives names through this, so the
/// registrar, the broker and the HTTP surface always agree on them.
#[derive(Debug, Clone)]
pub struct ChannelKeys {
    id: String,
}

impl ChannelKeys {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }

    /// The payload key: the appended byte log itself, also used as the
    /// notification topic for new appends.
    pub fn payload(&self) -> &str {
        &self.id
    }

    /// Completion marker; present means the producer has closed.
    pub fn done(&self) -> String {
        format!("{}:done", self.id)
    }

    /// Topic carrying "stop subscribers" notifications.
    pub fn kill(&self) -> String {
        format!("{}:kill", self.id)
    }

    /// Pattern covering the payload topic plus the kill topic.
    pub fn wildcard(&self) -> String {
        format!("{}*", self.id)
    }
}
