//! JavaScript run inside driven pages.

/// Selectors of the Substack sign-in form.
pub const PASSWORD_OPTION: &str = "a.login-option.substack-login__login-option";
pub const EMAIL_INPUT: &str = "input[name=email]";
pub const PASSWORD_INPUT: &str = "input[name=password]";
pub const SUBMIT_BUTTON: &str = "button[type=submit]";
pub const ERROR_CONTAINER: &str = "div.error-container";

/// Quote `value` as a JavaScript string literal.
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Fetch `url` from inside the page so the page's cookies ride along.
///
/// Resolves to `{status, body}`.
pub fn fetch_script(url: &str) -> String {
    format!(
        r#"
        (async () => {{
            const response = await fetch({url}, {{
                credentials: 'include',
                headers: {{ 'Accept': 'application/json, text/html;q=0.9, */*;q=0.8' }}
            }});
            return {{ status: response.status, body: await response.text() }};
        }})()
        "#,
        url = js_string(url)
    )
}

/// Text of the sign-in error banner, or an empty string.
pub fn login_error_script() -> String {
    format!(
        r#"
        (() => {{
            const el = document.querySelector({selector});
            return el ? el.innerText.trim() : '';
        }})()
        "#,
        selector = js_string(ERROR_CONTAINER)
    )
}

pub fn sign_in_url(publication: &str) -> String {
    format!(
        "https://substack.com/sign-in?redirect=%2F&for_pub={}",
        url::form_urlencoded::byte_serialize(publication.as_bytes()).collect::<String>()
    )
}
