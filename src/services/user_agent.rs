/// A family name plus its dotted version, e.g. `Chrome` / `120.0.6099`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UaComponent {
    pub family: String,
    /// Empty when no version could be read.
    pub version_string: String,
}

impl UaComponent {
    fn new(family: &str, version: Option<String>) -> Self {
        Self {
            family: family.to_string(),
            version_string: version.unwrap_or_default(),
        }
    }

    fn other() -> Self {
        Self::new("Other", None)
    }
}

/// What a user-agent parser extracts from a `User-Agent` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUserAgent {
    pub browser: UaComponent,
    pub os: UaComponent,
    pub device_family: String,
}

/// Turns a raw `User-Agent` string into browser, OS and device families.
///
/// Parsing never fails: unknown input maps to `Other` families.
pub trait UserAgentParser: Send + Sync {
    fn parse(&self, user_agent: &str) -> ParsedUserAgent;
}

/// Token-matching parser covering the mainstream browsers and platforms.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicUserAgentParser;

impl UserAgentParser for HeuristicUserAgentParser {
    fn parse(&self, user_agent: &str) -> ParsedUserAgent {
        ParsedUserAgent {
            browser: parse_browser(user_agent),
            os: parse_os(user_agent),
            device_family: parse_device(user_agent),
        }
    }
}

/// Reads the version right after `marker`, keeping at most three components.
fn version_after(user_agent: &str, marker: &str) -> Option<String> {
    let start = user_agent.find(marker)? + marker.len();
    let raw: String = user_agent[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '_')
        .map(|c| if c == '_' { '.' } else { c })
        .collect();

    let parts: Vec<&str> = raw.split('.').filter(|p| !p.is_empty()).take(3).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("."))
    }
}

fn parse_browser(ua: &str) -> UaComponent {
    // Order matters: Edge and Opera also advertise Chrome, Chrome also advertises Safari.
    if let Some(version) = version_after(ua, "Edg/")
        .or_else(|| version_after(ua, "EdgA/"))
        .or_else(|| version_after(ua, "Edge/"))
    {
        return UaComponent::new("Edge", Some(version));
    }
    if ua.contains("OPR/") || ua.contains("Opera") {
        let version = version_after(ua, "OPR/").or_else(|| version_after(ua, "Version/"));
        return UaComponent::new("Opera", version);
    }
    if ua.contains("Firefox/") || ua.contains("FxiOS/") {
        let version = version_after(ua, "Firefox/").or_else(|| version_after(ua, "FxiOS/"));
        return UaComponent::new("Firefox", version);
    }
    if ua.contains("Chrome/") || ua.contains("CriOS/") {
        let version = version_after(ua, "Chrome/").or_else(|| version_after(ua, "CriOS/"));
        return UaComponent::new("Chrome", version);
    }
    if ua.contains("Safari/") && ua.contains("Version/") {
        return UaComponent::new("Safari", version_after(ua, "Version/"));
    }
    if let Some(version) = version_after(ua, "MSIE ") {
        return UaComponent::new("Internet Explorer", Some(version));
    }
    if ua.contains("Trident/") {
        return UaComponent::new("Internet Explorer", version_after(ua, "rv:"));
    }

    UaComponent::other()
}

fn windows_release(nt_version: &str) -> &str {
    match nt_version {
        "10.0" => "10",
        "6.3" => "8.1",
        "6.2" => "8",
        "6.1" => "7",
        "6.0" => "Vista",
        "5.1" | "5.2" => "XP",
        other => other,
    }
}

fn parse_os(ua: &str) -> UaComponent {
    if ua.contains("Windows") {
        let release = version_after(ua, "Windows NT ").map(|v| windows_release(&v).to_string());
        return UaComponent::new("Windows", release);
    }
    if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iPod") {
        let version = version_after(ua, "iPhone OS ").or_else(|| version_after(ua, "CPU OS "));
        return UaComponent::new("iOS", version);
    }
    if ua.contains("Android") {
        return UaComponent::new("Android", version_after(ua, "Android "));
    }
    if ua.contains("CrOS") {
        return UaComponent::new("Chrome OS", None);
    }
    if ua.contains("Mac OS X") {
        return UaComponent::new("Mac OS X", version_after(ua, "Mac OS X "));
    }
    if ua.contains("Linux") {
        return UaComponent::new("Linux", None);
    }

    UaComponent::other()
}

fn parse_device(ua: &str) -> String {
    let lower = ua.to_lowercase();
    let family = if lower.contains("bot") || lower.contains("spider") || lower.contains("crawler") {
        "Spider"
    } else if ua.contains("iPhone") {
        "iPhone"
    } else if ua.contains("iPad") {
        "iPad"
    } else if ua.contains("iPod") {
        "iPod"
    } else if ua.contains("Android") && ua.contains("Mobile") {
        "Generic Smartphone"
    } else if ua.contains("Android") {
        "Generic Tablet"
    } else if ua.contains("Macintosh") {
        "Mac"
    } else {
        "Other"
    };

    family.to_string()
}
