use std::fmt;

/// Target platform the converted text is trimmed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Full,
    Markdown,
    Twitter,
    Threads,
    Linkedin,
    Instagram,
}

impl Platform {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Platform::Full),
            "markdown" => Some(Platform::Markdown),
            "twitter" => Some(Platform::Twitter),
            "threads" => Some(Platform::Threads),
            "linkedin" => Some(Platform::Linkedin),
            "instagram" => Some(Platform::Instagram),
            _ => None,
        }
    }

    /// Character budget of the platform, `None` for long-form targets.
    pub fn char_limit(&self) -> Option<usize> {
        match self {
            Platform::Full | Platform::Markdown => None,
            Platform::Twitter => Some(280),
            Platform::Threads => Some(500),
            Platform::Instagram => Some(2200),
            Platform::Linkedin => Some(3000),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Full => "full",
            Platform::Markdown => "markdown",
            Platform::Twitter => "twitter",
            Platform::Threads => "threads",
            Platform::Linkedin => "linkedin",
            Platform::Instagram => "instagram",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trim converted content to the platform's character budget.
///
/// Counts chars rather than bytes so multibyte text never splits mid
/// character.
pub fn truncate_for(platform: Platform, content: &str) -> String {
    match platform.char_limit() {
        None => content.to_string(),
        Some(limit) => {
            if content.chars().count() <= limit {
                content.to_string()
            } else {
                let cut: String = content.chars().take(limit).collect();
                cut.trim_end().to_string()
            }
        }
    }
}
