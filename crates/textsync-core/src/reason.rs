//! Edit-reason attribution.
//!
//! Commits credit their authors in the audit revision's reason as
//! `Edited by: alice, bob`. A later commit landing on an audit revision
//! that already credits someone keeps those names and appends new ones.

/// Prefix of an attribution reason.
pub const REASON_PREFIX: &str = "Edited by: ";

/// Ordered, duplicate-free list of credited usernames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditReason {
    usernames: Vec<String>,
}

impl EditReason {
    /// Names credited by an existing reason. Reasons in any other format
    /// credit nobody.
    #[must_use]
    pub fn parse(reason: Option<&str>) -> Self {
        let mut parsed = Self::default();
        if let Some(names) = reason.and_then(|r| r.trim().strip_prefix(REASON_PREFIX)) {
            parsed.extend(names.split(',').map(str::trim));
        }
        parsed
    }

    /// Append names not already credited, keeping first-seen order.
    pub fn extend<I, S>(&mut self, usernames: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in usernames {
            let name = name.as_ref().trim();
            if !name.is_empty() && !self.usernames.iter().any(|n| n == name) {
                self.usernames.push(name.to_string());
            }
        }
    }

    /// Credited usernames.
    #[must_use]
    pub fn usernames(&self) -> &[String] {
        &self.usernames
    }

    /// Render the reason, or `None` when nobody is credited.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        if self.usernames.is_empty() {
            None
        } else {
            Some(format!("{REASON_PREFIX}{}", self.usernames.join(", ")))
        }
    }
}
