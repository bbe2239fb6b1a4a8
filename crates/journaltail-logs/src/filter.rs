use journaltail_store::{FIELD_SYSLOG_IDENTIFIER, Journal, StoreError};
use journaltail_types::{LogRequest, Message, syslog_identifier};

/// Selects the entries of one function
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionFilter {
    /// Resolved namespace (never empty)
    namespace: String,

    /// Function name
    name: String,

    /// Instance to keep (None = all)
    instance: Option<String>,
}

impl FunctionFilter {
    /// Build the filter for a request, resolving an empty namespace to `default_namespace`
    pub fn new(request: &LogRequest, default_namespace: &str) -> Self {
        let instance = if request.instance.is_empty() {
            None
        } else {
            Some(request.instance.clone())
        };

        Self {
            namespace: request.namespace_or(default_namespace).to_string(),
            name: request.name.clone(),
            instance,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    /// The `namespace:name` identifier entries are tagged with
    pub fn identifier(&self) -> String {
        syslog_identifier(&self.namespace, &self.name)
    }

    /// Match expression in `journalctl` syntax
    pub fn match_expression(&self) -> String {
        format!("{}={}", FIELD_SYSLOG_IDENTIFIER, self.identifier())
    }

    /// Install the identifier match on a journal handle.
    ///
    /// The instance is not part of the store match; see [`FunctionFilter::matches`].
    pub fn apply<J: Journal>(&self, journal: &mut J) -> Result<(), StoreError> {
        journal.add_match(FIELD_SYSLOG_IDENTIFIER, &self.identifier())
    }

    /// Check a parsed message against the instance filter
    pub fn matches(&self, message: &Message) -> bool {
        match &self.instance {
            Some(instance) => &message.instance == instance,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(instance: &str) -> Message {
        Message {
            text: "hello".to_string(),
            timestamp: Utc::now(),
            namespace: "openfaas-fn".to_string(),
            name: "figlet".to_string(),
            instance: instance.to_string(),
        }
    }

    #[test]
    fn test_default_namespace() {
        let filter = FunctionFilter::new(&LogRequest::new("figlet"), "openfaas-fn");
        assert_eq!(filter.identifier(), "openfaas-fn:figlet");
        assert_eq!(filter.match_expression(), "SYSLOG_IDENTIFIER=openfaas-fn:figlet");
        assert_eq!(filter.instance(), None);
    }

    #[test]
    fn test_explicit_namespace() {
        let request = LogRequest::new("figlet").with_namespace("team-a");
        let filter = FunctionFilter::new(&request, "openfaas-fn");
        assert_eq!(filter.namespace(), "team-a");
        assert_eq!(filter.identifier(), "team-a:figlet");
    }

    #[test]
    fn test_instance_matching() {
        let all = FunctionFilter::new(&LogRequest::new("figlet"), "openfaas-fn");
        assert!(all.matches(&message("42")));
        assert!(all.matches(&message("")));

        let one = FunctionFilter::new(&LogRequest::new("figlet").with_instance("42"), "openfaas-fn");
        assert!(one.matches(&message("42")));
        assert!(!one.matches(&message("43")));
        assert!(!one.matches(&message("")));
    }
}
