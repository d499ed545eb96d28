//! The builtin filter library. Filters take the piped value, an optional
//! argument and the active context, and produce a new value; safety
//! bookkeeping is handled by the flags on each registration.

use std::fmt::Write as _;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use humansize::{ISizeFormatter, DECIMAL};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};
use stencil_escape::{escape_html, strip_tags};

use crate::context::Context;
use crate::error::RenderError;
use crate::library::{FilterDef, Library};
use crate::value::{Safety, Value};

type Result<T = Value> = std::result::Result<T, RenderError>;

pub fn default_library() -> Library {
    let mut lib = Library::new();
    lib.filter_def("add", FilterDef::new(add));
    lib.filter_def("capfirst", FilterDef::new(capfirst).is_safe());
    lib.filter_def("center", FilterDef::new(center).is_safe());
    lib.filter_def("cut", FilterDef::new(cut));
    lib.filter_def("date", FilterDef::new(date).is_safe().expects_localtime());
    lib.filter_def("default", FilterDef::new(default));
    lib.filter_def("default_if_none", FilterDef::new(default_if_none));
    lib.filter_def("escape", FilterDef::new(escape).is_safe());
    lib.filter_def("filesizeformat", FilterDef::new(filesizeformat).is_safe());
    lib.filter_def("first", FilterDef::new(first));
    lib.filter_def("force_escape", FilterDef::new(force_escape).is_safe());
    lib.filter_def("join", FilterDef::new(join).needs_autoescape());
    lib.filter_def("last", FilterDef::new(last));
    lib.filter_def("length", FilterDef::new(length).is_safe());
    lib.filter_def(
        "linebreaksbr",
        FilterDef::new(linebreaksbr).needs_autoescape(),
    );
    lib.filter_def("ljust", FilterDef::new(ljust).is_safe());
    lib.filter_def("lower", FilterDef::new(lower).is_safe());
    lib.filter_def("pluralize", FilterDef::new(pluralize).is_safe());
    lib.filter_def("rjust", FilterDef::new(rjust).is_safe());
    lib.filter_def("safe", FilterDef::new(safe).is_safe());
    lib.filter_def("striptags", FilterDef::new(striptags).is_safe());
    lib.filter_def("title", FilterDef::new(title).is_safe());
    lib.filter_def("truncatechars", FilterDef::new(truncatechars).is_safe());
    lib.filter_def("truncatewords", FilterDef::new(truncatewords).is_safe());
    lib.filter_def("upper", FilterDef::new(upper).is_safe());
    lib.filter_def("urlencode", FilterDef::new(urlencode).is_safe());
    lib.filter_def("wordcount", FilterDef::new(wordcount).is_safe());
    lib.filter_def("yesno", FilterDef::new(yesno).is_safe());
    lib
}

fn arg_text(arg: Option<Value>) -> Option<String> {
    arg.map(|v| v.to_text())
}

fn require_int(arg: Option<Value>, filter: &str) -> Result<i64> {
    arg.and_then(|v| v.as_int())
        .ok_or_else(|| RenderError::msg(format!("'{filter}' filter requires an integer argument")))
}

/// Integer addition when both sides look numeric, otherwise
/// concatenation; a hopeless combination yields the empty string.
fn add(value: Value, arg: Option<Value>, _ctx: &Context) -> Result {
    let Some(arg) = arg else {
        return Err(RenderError::msg("'add' filter requires an argument"));
    };
    if let (Some(a), Some(b)) = (value.as_int(), arg.as_int()) {
        return Ok(Value::Int(a + b));
    }
    match (&value, &arg) {
        (Value::List(a), Value::List(b)) => {
            let mut combined = a.clone();
            combined.extend(b.iter().cloned());
            Ok(Value::List(combined))
        }
        (Value::Str(a, _), Value::Str(b, _)) => Ok(Value::str(format!("{a}{b}"))),
        _ => Ok(Value::str("")),
    }
}

fn capfirst(value: Value, _arg: Option<Value>, _ctx: &Context) -> Result {
    let text = value.to_text();
    let mut chars = text.chars();
    let out = match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => text,
    };
    Ok(Value::str(out))
}

fn center(value: Value, arg: Option<Value>, _ctx: &Context) -> Result {
    let width = require_int(arg, "center")?.max(0) as usize;
    Ok(Value::str(format!("{:^width$}", value.to_text())))
}

fn cut(value: Value, arg: Option<Value>, _ctx: &Context) -> Result {
    let Some(needle) = arg_text(arg) else {
        return Err(RenderError::msg("'cut' filter requires an argument"));
    };
    Ok(Value::str(value.to_text().replace(&needle, "")))
}

fn parse_datetime(value: &Value) -> Option<DateTime<FixedOffset>> {
    match value {
        Value::Int(ts) => DateTime::<Utc>::from_timestamp(*ts, 0).map(|dt| dt.fixed_offset()),
        Value::Str(s, _) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                        .ok()
                        .map(|naive| naive.and_utc().fixed_offset())
                })
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                        .map(|naive| naive.and_utc().fixed_offset())
                })
        }
        _ => None,
    }
}

/// Formats a datetime with a strftime-style format string, shifted into
/// the active timezone when one is configured. Unparseable input renders
/// as the empty string.
fn date(value: Value, arg: Option<Value>, ctx: &Context) -> Result {
    let Some(datetime) = parse_datetime(&value) else {
        return Ok(Value::str(""));
    };
    let datetime = match (ctx.use_tz, ctx.timezone) {
        (true, Some(tz)) => datetime.with_timezone(&tz),
        _ => datetime,
    };
    let format = arg_text(arg).unwrap_or_else(|| "%Y-%m-%d".to_string());
    let mut out = String::new();
    if write!(out, "{}", datetime.format(&format)).is_err() {
        return Ok(Value::str(""));
    }
    Ok(Value::str(out))
}

fn default(value: Value, arg: Option<Value>, _ctx: &Context) -> Result {
    let Some(fallback) = arg else {
        return Err(RenderError::msg("'default' filter requires an argument"));
    };
    Ok(if value.is_truthy() { value } else { fallback })
}

fn default_if_none(value: Value, arg: Option<Value>, _ctx: &Context) -> Result {
    let Some(fallback) = arg else {
        return Err(RenderError::msg(
            "'default_if_none' filter requires an argument",
        ));
    };
    Ok(if value.is_null() { fallback } else { value })
}

/// Marks the value for escaping on output. The escaping itself is
/// deferred, so stacking `escape` applies only once.
fn escape(value: Value, _arg: Option<Value>, _ctx: &Context) -> Result {
    Ok(value.mark_for_escaping())
}

fn filesizeformat(value: Value, _arg: Option<Value>, _ctx: &Context) -> Result {
    let bytes = value.as_f64().unwrap_or(0.0).max(0.0);
    Ok(Value::str(format!(
        "{}",
        ISizeFormatter::new(bytes, &DECIMAL)
    )))
}

fn first(value: Value, _arg: Option<Value>, _ctx: &Context) -> Result {
    match value {
        Value::List(items) => Ok(items.into_iter().next().unwrap_or(Value::Null)),
        Value::Str(s, safety) => Ok(s
            .chars()
            .next()
            .map(|c| Value::Str(c.to_string(), safety))
            .unwrap_or(Value::Null)),
        _ => Ok(Value::Null),
    }
}

fn force_escape(value: Value, _arg: Option<Value>, _ctx: &Context) -> Result {
    Ok(Value::safe(escape_html(&value.to_text()).into_owned()))
}

fn conditional_escape(value: &Value, autoescape: bool) -> String {
    let text = value.to_text();
    if autoescape && value.safety() == Safety::Unsafe {
        escape_html(&text).into_owned()
    } else {
        text
    }
}

fn join(value: Value, arg: Option<Value>, ctx: &Context) -> Result {
    let Value::List(items) = value else {
        return Ok(value);
    };
    let sep = arg
        .as_ref()
        .map(|v| conditional_escape(v, ctx.autoescape))
        .unwrap_or_default();
    let parts: Vec<String> = items
        .iter()
        .map(|item| conditional_escape(item, ctx.autoescape))
        .collect();
    Ok(Value::safe(parts.join(&sep)))
}

fn last(value: Value, _arg: Option<Value>, _ctx: &Context) -> Result {
    match value {
        Value::List(items) => Ok(items.into_iter().last().unwrap_or(Value::Null)),
        Value::Str(s, safety) => Ok(s
            .chars()
            .last()
            .map(|c| Value::Str(c.to_string(), safety))
            .unwrap_or(Value::Null)),
        _ => Ok(Value::Null),
    }
}

fn length(value: Value, _arg: Option<Value>, _ctx: &Context) -> Result {
    match value {
        Value::List(items) => Ok(Value::Int(items.len() as i64)),
        Value::Str(s, _) => Ok(Value::Int(s.chars().count() as i64)),
        Value::Map(map) => Ok(Value::Int(map.len() as i64)),
        _ => Ok(Value::str("")),
    }
}

fn linebreaksbr(value: Value, _arg: Option<Value>, ctx: &Context) -> Result {
    let text = conditional_escape(&value, ctx.autoescape);
    Ok(Value::safe(text.replace('\n', "<br />")))
}

fn ljust(value: Value, arg: Option<Value>, _ctx: &Context) -> Result {
    let width = require_int(arg, "ljust")?.max(0) as usize;
    Ok(Value::str(format!("{:<width$}", value.to_text())))
}

fn lower(value: Value, _arg: Option<Value>, _ctx: &Context) -> Result {
    Ok(Value::str(value.to_text().to_lowercase()))
}

/// Appends a plural suffix unless the value counts exactly one. The
/// argument is `"suffix"` or `"singular,plural"`; the default is `s`.
fn pluralize(value: Value, arg: Option<Value>, _ctx: &Context) -> Result {
    let arg = arg_text(arg).unwrap_or_else(|| "s".to_string());
    let (singular, plural) = match arg.split_once(',') {
        Some((singular, plural)) => (singular.to_string(), plural.to_string()),
        None => (String::new(), arg),
    };
    let count = match &value {
        Value::List(items) => Some(items.len() as i64),
        other => other.as_int(),
    };
    let suffix = match count {
        Some(1) => singular,
        Some(_) => plural,
        None => String::new(),
    };
    Ok(Value::str(suffix))
}

fn rjust(value: Value, arg: Option<Value>, _ctx: &Context) -> Result {
    let width = require_int(arg, "rjust")?.max(0) as usize;
    Ok(Value::str(format!("{:>width$}", value.to_text())))
}

fn safe(value: Value, _arg: Option<Value>, _ctx: &Context) -> Result {
    match value {
        Value::Str(..) => Ok(value.mark_safe()),
        other => Ok(Value::safe(other.to_text())),
    }
}

fn striptags(value: Value, _arg: Option<Value>, _ctx: &Context) -> Result {
    Ok(Value::str(strip_tags(&value.to_text())))
}

fn title(value: Value, _arg: Option<Value>, _ctx: &Context) -> Result {
    let text = value.to_text().to_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if at_word_start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !c.is_alphanumeric();
    }
    Ok(Value::str(out))
}

fn truncatechars(value: Value, arg: Option<Value>, _ctx: &Context) -> Result {
    let limit = require_int(arg, "truncatechars")?.max(0) as usize;
    let text = value.to_text();
    if text.chars().count() <= limit {
        return Ok(Value::str(text));
    }
    let keep = limit.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    Ok(Value::str(out))
}

fn truncatewords(value: Value, arg: Option<Value>, _ctx: &Context) -> Result {
    let limit = require_int(arg, "truncatewords")?.max(0) as usize;
    let text = value.to_text();
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= limit {
        return Ok(Value::str(words.join(" ")));
    }
    let mut out = words[..limit].join(" ");
    out.push_str(" ...");
    Ok(Value::str(out))
}

fn upper(value: Value, _arg: Option<Value>, _ctx: &Context) -> Result {
    Ok(Value::str(value.to_text().to_uppercase()))
}

const URL_SAFE_DEFAULT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

/// Percent-encodes the value for use in a URL. The argument overrides
/// the set of characters left unencoded; `/` is left alone by default.
fn urlencode(value: Value, arg: Option<Value>, _ctx: &Context) -> Result {
    let text = value.to_text();
    let encoded = match arg_text(arg) {
        None => percent_encoding::utf8_percent_encode(&text, URL_SAFE_DEFAULT).to_string(),
        Some(extra_safe) => {
            let mut set = NON_ALPHANUMERIC
                .remove(b'_')
                .remove(b'.')
                .remove(b'-')
                .remove(b'~');
            for byte in extra_safe.bytes() {
                if byte.is_ascii() {
                    set = set.remove(byte);
                }
            }
            let set: &'static AsciiSet = Box::leak(Box::new(set));
            percent_encoding::utf8_percent_encode(&text, set).to_string()
        }
    };
    Ok(Value::str(encoded))
}

fn wordcount(value: Value, _arg: Option<Value>, _ctx: &Context) -> Result {
    Ok(Value::Int(value.to_text().split_whitespace().count() as i64))
}

/// Maps truth to words: the argument is `"yes,no"` or `"yes,no,maybe"`,
/// where `maybe` is used for null.
fn yesno(value: Value, arg: Option<Value>, _ctx: &Context) -> Result {
    let arg = arg_text(arg).unwrap_or_else(|| "yes,no,maybe".to_string());
    let parts: Vec<&str> = arg.split(',').collect();
    if parts.len() < 2 {
        return Ok(value);
    }
    let chosen = if value.is_null() && parts.len() > 2 {
        parts[2]
    } else if value.is_truthy() {
        parts[0]
    } else {
        parts[1]
    };
    Ok(Value::str(chosen))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new()
    }

    #[test]
    fn test_add() {
        let out = add(Value::Int(4), Some(Value::str("3")), &ctx()).unwrap();
        assert_eq!(out, Value::Int(7));
        let out = add(Value::str("ab"), Some(Value::str("cd")), &ctx()).unwrap();
        assert_eq!(out, Value::str("abcd"));
        let out = add(Value::str("ab"), Some(Value::List(vec![])), &ctx()).unwrap();
        assert_eq!(out, Value::str(""));
    }

    #[test]
    fn test_capfirst_and_title() {
        assert_eq!(
            capfirst(Value::str("hello world"), None, &ctx()).unwrap(),
            Value::str("Hello world")
        );
        assert_eq!(
            title(Value::str("my FIRST post"), None, &ctx()).unwrap(),
            Value::str("My First Post")
        );
    }

    #[test]
    fn test_cut() {
        assert_eq!(
            cut(Value::str("a b c"), Some(Value::str(" ")), &ctx()).unwrap(),
            Value::str("abc")
        );
    }

    #[test]
    fn test_default_family() {
        assert_eq!(
            default(Value::str(""), Some(Value::str("x")), &ctx()).unwrap(),
            Value::str("x")
        );
        assert_eq!(
            default_if_none(Value::str(""), Some(Value::str("x")), &ctx()).unwrap(),
            Value::str("")
        );
        assert_eq!(
            default_if_none(Value::Null, Some(Value::str("x")), &ctx()).unwrap(),
            Value::str("x")
        );
    }

    #[test]
    fn test_join_escapes_items_not_result() {
        let items = Value::List(vec![Value::str("<a>"), Value::safe("<b>")]);
        let out = join(items, Some(Value::safe(" & ")), &ctx()).unwrap();
        assert_eq!(out.as_str(), Some("&lt;a&gt; & <b>"));
        assert_eq!(out.safety(), Safety::Safe);
    }

    #[test]
    fn test_length() {
        assert_eq!(
            length(Value::from(vec![1i64, 2, 3]), None, &ctx()).unwrap(),
            Value::Int(3)
        );
        assert_eq!(length(Value::str("héllo"), None, &ctx()).unwrap(), Value::Int(5));
        assert_eq!(length(Value::Int(9), None, &ctx()).unwrap(), Value::str(""));
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize(Value::Int(1), None, &ctx()).unwrap(), Value::str(""));
        assert_eq!(pluralize(Value::Int(2), None, &ctx()).unwrap(), Value::str("s"));
        assert_eq!(
            pluralize(Value::Int(3), Some(Value::str("y,ies")), &ctx()).unwrap(),
            Value::str("ies")
        );
    }

    #[test]
    fn test_truncation() {
        assert_eq!(
            truncatechars(Value::str("Joel is a slug"), Some(Value::Int(9)), &ctx()).unwrap(),
            Value::str("Joel i...")
        );
        assert_eq!(
            truncatewords(Value::str("Joel is a slug"), Some(Value::Int(2)), &ctx()).unwrap(),
            Value::str("Joel is ...")
        );
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(
            urlencode(Value::str("/path to/x"), None, &ctx()).unwrap(),
            Value::str("/path%20to/x")
        );
        assert_eq!(
            urlencode(Value::str("a/b"), Some(Value::str("")), &ctx()).unwrap(),
            Value::str("a%2Fb")
        );
    }

    #[test]
    fn test_filesizeformat() {
        assert_eq!(
            filesizeformat(Value::Int(0), None, &ctx()).unwrap(),
            Value::str("0 B")
        );
        assert_eq!(
            filesizeformat(Value::Int(1_234_567), None, &ctx()).unwrap(),
            Value::str("1.23 MB")
        );
    }

    #[test]
    fn test_yesno() {
        assert_eq!(
            yesno(Value::Bool(true), Some(Value::str("yeah,no,maybe")), &ctx()).unwrap(),
            Value::str("yeah")
        );
        assert_eq!(
            yesno(Value::Null, Some(Value::str("yeah,no,maybe")), &ctx()).unwrap(),
            Value::str("maybe")
        );
        assert_eq!(yesno(Value::Int(0), None, &ctx()).unwrap(), Value::str("no"));
    }

    #[test]
    fn test_date_formats_and_rejects() {
        let out = date(
            Value::str("2008-06-10 14:30:00"),
            Some(Value::str("%d %b %Y")),
            &ctx(),
        )
        .unwrap();
        assert_eq!(out, Value::str("10 Jun 2008"));
        assert_eq!(date(Value::str("not a date"), None, &ctx()).unwrap(), Value::str(""));
    }

    #[test]
    fn test_escape_is_lazy_and_idempotent() {
        let once = escape(Value::str("<"), None, &ctx()).unwrap();
        let twice = escape(once.clone(), None, &ctx()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.safety(), Safety::MustEscape);
    }
}
