use grmcp_core::ServiceInfo;
use std::fmt::Display;

/// A wrapper struct for a formatted string.
///
/// Implements `Display` so it can be printed directly.
pub struct FormattedString(pub String);

pub struct ServiceList(pub Vec<ServiceInfo>);

impl Display for FormattedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.0)
    }
}

impl From<serde_json::Value> for FormattedString {
    fn from(value: serde_json::Value) -> Self {
        FormattedString(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
    }
}

impl From<ServiceList> for FormattedString {
    fn from(ServiceList(services): ServiceList) -> Self {
        if services.is_empty() {
            return FormattedString("No services found.".to_string());
        }

        let mut out = String::from("Available Services:\n");

        for service in services {
            out.push_str(&format!("  {} ({})\n", service.name, service.file));

            for method in &service.methods {
                let input = if method.client_streaming {
                    format!("stream {}", method.input_type)
                } else {
                    method.input_type.clone()
                };
                let output = if method.server_streaming {
                    format!("stream {}", method.output_type)
                } else {
                    method.output_type.clone()
                };

                out.push_str(&format!("    - {}({input}) returns ({output})\n", method.name));

                if let Some(first_line) = method.description.lines().next() {
                    out.push_str(&format!("        {first_line}\n"));
                }
            }
        }

        FormattedString(out.trim_end().to_string())
    }
}
