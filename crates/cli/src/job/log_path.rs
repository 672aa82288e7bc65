//! Scheduler output-path templates.

use std::path::PathBuf;

/// Values substituted into an output-path template.
#[derive(Debug, Clone, Default)]
pub struct LogPathVars<'a> {
	pub job_id: Option<&'a str>,
	pub job_name: Option<&'a str>,
	pub user: Option<&'a str>,
	pub node: Option<&'a str>,
}

/// Expands `%j`, `%x`, `%u`, `%N` and `%%` the way the scheduler does.
/// Placeholders without a value, and unknown ones, are kept verbatim.
pub fn realize_log_path(template: &str, vars: &LogPathVars<'_>) -> PathBuf {
	let mut out = String::with_capacity(template.len());
	let mut chars = template.chars();
	while let Some(c) = chars.next() {
		if c != '%' {
			out.push(c);
			continue;
		}
		let Some(code) = chars.next() else {
			out.push('%');
			break;
		};
		let value = match code {
			'%' => Some("%"),
			'j' => vars.job_id,
			'x' => vars.job_name,
			'u' => vars.user,
			'N' => vars.node,
			_ => None,
		};
		match value {
			Some(value) => out.push_str(value),
			None => {
				out.push('%');
				out.push(code);
			}
		}
	}
	PathBuf::from(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn expands_known_placeholders() {
		let vars = LogPathVars {
			job_id: Some("4242"),
			job_name: Some("tunnel-job"),
			user: Some("alice"),
			node: None,
		};
		assert_eq!(realize_log_path("logs/%x-%j.log", &vars), PathBuf::from("logs/tunnel-job-4242.log"));
		assert_eq!(realize_log_path("/scratch/%u/100%%-%N.out", &vars), PathBuf::from("/scratch/alice/100%-%N.out"));
		assert_eq!(realize_log_path("trailing%", &vars), PathBuf::from("trailing%"));
	}
}
