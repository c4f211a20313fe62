//! Static HTML served by the proxy when a site cannot be reached.
//!
//! Both pages are embedded in backtick tokens, so they must never contain a
//! backtick. Caddy placeholders such as `{http.request.host}` are expanded
//! when the response is written.

pub(super) const GATEWAY_ERROR_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Site Unavailable</title>
<style>
body { font-family: system-ui, sans-serif; background: #0f172a; color: #f8fafc; display: flex; align-items: center; justify-content: center; min-height: 100vh; margin: 0; }
main { max-width: 32rem; padding: 1.5rem; text-align: center; }
h1 { font-size: 1.5rem; }
p { color: #94a3b8; line-height: 1.6; }
code { color: #f87171; }
</style>
</head>
<body>
<main>
<h1>PHP is not responding</h1>
<p>The runtime serving <code>{http.request.host}</code> did not answer. It may be stopped, restarting or overloaded.</p>
<p>Check the runtime status in the control panel and try again shortly.</p>
</main>
</body>
</html>"#;

pub(super) const NOT_FOUND_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Site Not Configured</title>
<style>
body { font-family: system-ui, sans-serif; background: #0f172a; color: #f8fafc; display: flex; align-items: center; justify-content: center; min-height: 100vh; margin: 0; }
main { max-width: 32rem; padding: 1.5rem; text-align: center; }
h1 { font-size: 1.5rem; }
p { color: #94a3b8; line-height: 1.6; }
code { color: #f59e0b; }
</style>
</head>
<body>
<main>
<h1>Site not configured</h1>
<p><code>{http.request.host}</code> is not hosted on this server.</p>
<p>Create a site for this domain and point its DNS records here.</p>
</main>
</body>
</html>"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_fit_in_backtick_tokens() {
        assert!(!GATEWAY_ERROR_PAGE.contains('`'));
        assert!(!NOT_FOUND_PAGE.contains('`'));
    }
}
