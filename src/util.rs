use std::borrow::Cow;

const CONFIG_PATH: &str = "QUEUEWATCH_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config/config.json";

pub fn get_config_path() -> String {
    std::env::var(CONFIG_PATH).unwrap_or_else(|_| String::from(DEFAULT_CONFIG_PATH))
}

/// Percent-encodes a single path segment, including `/`.
pub fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Builds a parameterized item key, e.g. `rabbitmq.queue.size[/,jobs]`.
///
/// Parameters that would break the bracket syntax are quoted: `size["a,b",c]`.
pub fn item_key(prefix: &str, metric: &str, vhost: &str, queue: &str) -> String {
    format!("{prefix}.{metric}[{},{}]", quote_param(vhost), quote_param(queue))
}

fn quote_param(param: &str) -> Cow<'_, str> {
    let needs_quotes = param.contains([',', ']', '"']) || param.starts_with([' ', '[']);
    if needs_quotes {
        Cow::Owned(format!("\"{}\"", param.replace('"', "\\\"")))
    } else {
        Cow::Borrowed(param)
    }
}

/// Bracketed parameters of an item key: `a.b[x,"y,z"]` yields `["x", "y,z"]`.
pub fn item_key_params(key: &str) -> Option<Vec<String>> {
    let (_, rest) = key.split_once('[')?;
    let mut chars = rest.strip_suffix(']')?.chars().peekable();
    let mut params = Vec::new();

    loop {
        while chars.next_if_eq(&' ').is_some() {}
        let mut param = String::new();

        if chars.next_if_eq(&'"').is_some() {
            loop {
                match chars.next()? {
                    '\\' if chars.peek() == Some(&'"') => {
                        chars.next();
                        param.push('"');
                    }
                    '"' => break,
                    c => param.push(c),
                }
            }
            while chars.next_if_eq(&' ').is_some() {}
            params.push(param);
            match chars.next() {
                None => return Some(params),
                Some(',') => continue,
                Some(_) => return None,
            }
        }

        loop {
            match chars.next() {
                None => {
                    params.push(param);
                    return Some(params);
                }
                Some(',') => break,
                Some(c) => param.push(c),
            }
        }
        params.push(param);
    }
}
