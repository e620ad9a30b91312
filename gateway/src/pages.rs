//! Inline HTML for the setup and login forms.
//!
//! Both gates render these pages: the HTTP gate through axum handlers
//! and the proxy gate as raw HTTP responses during first-run setup.

/// Escapes text for safe interpolation into HTML.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn shell(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>
  body {{ font-family: system-ui, sans-serif; background: #f2f4f8; margin: 0;
          display: flex; align-items: center; justify-content: center; min-height: 100vh; }}
  .card {{ background: #fff; border-radius: 12px; padding: 2rem 2.5rem;
           box-shadow: 0 4px 16px rgba(0,0,0,.08); width: 20rem; }}
  h1 {{ font-size: 1.25rem; margin-top: 0; }}
  label {{ display: block; margin: .75rem 0 .25rem; font-size: .9rem; color: #444; }}
  input {{ width: 100%; padding: .5rem; border: 1px solid #ccd; border-radius: 6px;
           box-sizing: border-box; }}
  button {{ margin-top: 1.25rem; width: 100%; padding: .6rem; border: 0;
            border-radius: 6px; background: #2563eb; color: #fff; font-size: 1rem;
            cursor: pointer; }}
  .error {{ color: #b91c1c; font-size: .85rem; margin: .5rem 0 0; }}
</style>
</head>
<body>
<div class="card">
{body}
</div>
</body>
</html>
"#
    )
}

/// First-run form asking the operator to create the credential.
pub fn setup_page(error: Option<&str>) -> String {
    let error_html = error
        .map(|e| format!(r#"<p class="error">{}</p>"#, html_escape(e)))
        .unwrap_or_default();
    shell(
        "GymGate Setup",
        &format!(
            r#"<h1>Create your account</h1>
<form method="post" action="/setup">
  <label for="username">Username</label>
  <input id="username" name="username" autocomplete="username" required>
  <label for="password">Password</label>
  <input id="password" name="password" type="password" autocomplete="new-password" required>
  <button type="submit">Save</button>
</form>{error_html}"#
        ),
    )
}

/// Login form. `username` pre-fills the field; `error` renders beneath it.
pub fn login_page(error: Option<&str>, username: &str) -> String {
    let error_html = error
        .map(|e| format!(r#"<p class="error">{}</p>"#, html_escape(e)))
        .unwrap_or_default();
    let username = html_escape(username);
    shell(
        "GymGate Login",
        &format!(
            r#"<h1>Sign in</h1>
<form method="post" action="/login">
  <label for="username">Username</label>
  <input id="username" name="username" value="{username}" autocomplete="username" required>
  <label for="password">Password</label>
  <input id="password" name="password" type="password" autocomplete="current-password" required>
  <button type="submit">Sign in</button>
</form>{error_html}"#
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_neutralizes_markup() {
        assert_eq!(
            html_escape(r#"<script>"a"&'b'</script>"#),
            "&lt;script&gt;&quot;a&quot;&amp;&#39;b&#39;&lt;/script&gt;"
        );
    }

    #[test]
    fn setup_page_posts_to_setup() {
        let page = setup_page(None);
        assert!(page.contains(r#"action="/setup""#));
        assert!(!page.contains("class=\"error\""));
    }

    #[test]
    fn login_page_prefills_and_escapes_username() {
        let page = login_page(Some("account or password incorrect"), "<admin>");
        assert!(page.contains(r#"value="&lt;admin&gt;""#));
        assert!(page.contains("account or password incorrect"));
    }
}
