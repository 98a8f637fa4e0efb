//! Address-bar input resolution.

use url::Url;
use url::form_urlencoded;

/// Resolves raw address-bar input into a navigation target.
///
/// Absolute URLs pass through href-normalized. Bare hostnames (and
/// host-plus-path inputs) get `https://` prepended. Everything else becomes
/// a search query appended URL-encoded to `search_template`.
pub fn rewrite_address(input: &str, search_template: &str) -> String {
	let value = input.split_whitespace().collect::<Vec<_>>().join(" ");

	if let Ok(url) = Url::parse(&value) {
		return url.to_string();
	}

	if value.contains(' ') {
		return search(search_template, &value);
	}

	match value.find('/') {
		Some(0) => search(search_template, &value),
		Some(i) => {
			if is_hostname(&value[..i]) {
				format!("https://{value}")
			} else {
				search(search_template, &value)
			}
		}
		None => {
			if is_hostname(&value) && value.contains('.') {
				format!("https://{value}")
			} else {
				search(search_template, &value)
			}
		}
	}
}

fn search(template: &str, query: &str) -> String {
	let encoded: String = form_urlencoded::byte_serialize(query.as_bytes()).collect();
	format!("{template}{encoded}")
}

/// Syntactic hostname check: ASCII alphanumerics, `-`, and `.` only.
fn is_hostname(s: &str) -> bool {
	s.chars()
		.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}
