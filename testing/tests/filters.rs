use serde_json::json;
use stencil::{to_value, Context, Template, Value};

fn render(source: &str, ctx: &mut Context) -> String {
    Template::new(source).unwrap().render(ctx).unwrap()
}

#[test]
fn test_chained_pipeline() {
    let mut ctx = Context::new();
    ctx.insert("name", "  ada lovelace");
    assert_eq!(render("{{ name|cut:' '|upper }}", &mut ctx), "ADALOVELACE");
}

#[test]
fn test_filter_arguments() {
    let mut ctx = Context::new();
    ctx.insert("n", 5i64);
    assert_eq!(render("{{ n|add:3 }}", &mut ctx), "8");
    assert_eq!(render("{{ n|add:n }}", &mut ctx), "10");
    ctx.insert("word", "hi");
    assert_eq!(render("[{{ word|ljust:4 }}]", &mut ctx), "[hi  ]");
    assert_eq!(render("[{{ word|rjust:4 }}]", &mut ctx), "[  hi]");
    assert_eq!(render("[{{ word|center:4 }}]", &mut ctx), "[ hi ]");
}

#[test]
fn test_missing_filter_argument_resolves_null() {
    let mut ctx = Context::new();
    ctx.insert("x", Value::Null);
    assert_eq!(render("{{ x|default:absent }}", &mut ctx), "");
}

#[test]
fn test_default_and_default_if_none() {
    let mut ctx = Context::new();
    ctx.insert("empty", "");
    ctx.insert("nothing", Value::Null);
    assert_eq!(render("{{ empty|default:'d' }}", &mut ctx), "d");
    assert_eq!(render("{{ empty|default_if_none:'d' }}", &mut ctx), "");
    assert_eq!(render("{{ nothing|default_if_none:'d' }}", &mut ctx), "d");
}

#[test]
fn test_join() {
    let mut ctx = Context::new();
    ctx.insert("items", to_value(json!(["a", "<b>", "c"])).unwrap());
    assert_eq!(
        render("{{ items|join:', ' }}", &mut ctx),
        "a, &lt;b&gt;, c"
    );
    assert_eq!(
        render("{% autoescape off %}{{ items|join:', ' }}{% endautoescape %}", &mut ctx),
        "a, <b>, c"
    );
}

#[test]
fn test_first_last_length() {
    let mut ctx = Context::new();
    ctx.insert("items", to_value(json!([3, 1, 2])).unwrap());
    assert_eq!(render("{{ items|first }}", &mut ctx), "3");
    assert_eq!(render("{{ items|last }}", &mut ctx), "2");
    assert_eq!(render("{{ items|length }}", &mut ctx), "3");
    ctx.insert("word", "héllo");
    assert_eq!(render("{{ word|length }}", &mut ctx), "5");
}

#[test]
fn test_pluralize() {
    let mut ctx = Context::new();
    ctx.insert("one", 1i64);
    ctx.insert("many", 3i64);
    assert_eq!(render("vote{{ one|pluralize }}", &mut ctx), "vote");
    assert_eq!(render("vote{{ many|pluralize }}", &mut ctx), "votes");
    assert_eq!(render("cherr{{ many|pluralize:'y,ies' }}", &mut ctx), "cherries");
    ctx.insert("items", to_value(json!([1, 2])).unwrap());
    assert_eq!(render("item{{ items|pluralize }}", &mut ctx), "items");
}

#[test]
fn test_text_shaping() {
    let mut ctx = Context::new();
    ctx.insert("s", "my FIRST post");
    assert_eq!(render("{{ s|title }}", &mut ctx), "My First Post");
    assert_eq!(render("{{ s|capfirst }}", &mut ctx), "My FIRST post");
    assert_eq!(render("{{ s|lower }}", &mut ctx), "my first post");
    assert_eq!(render("{{ s|upper }}", &mut ctx), "MY FIRST POST");
    assert_eq!(render("{{ s|wordcount }}", &mut ctx), "3");
    assert_eq!(render("{{ s|truncatewords:2 }}", &mut ctx), "my FIRST ...");
}

#[test]
fn test_striptags_and_linebreaksbr() {
    let mut ctx = Context::new();
    ctx.insert("html", Value::safe("<p>para</p>"));
    assert_eq!(render("{{ html|striptags }}", &mut ctx), "para");
    ctx.insert("text", "a\nb");
    assert_eq!(render("{{ text|linebreaksbr }}", &mut ctx), "a<br />b");
}

#[test]
fn test_filesizeformat() {
    let mut ctx = Context::new();
    ctx.insert("bytes", 1_234_567i64);
    assert_eq!(render("{{ bytes|filesizeformat }}", &mut ctx), "1.23 MB");
}

#[test]
fn test_yesno() {
    let mut ctx = Context::new();
    ctx.insert("flag", true);
    ctx.insert("nothing", Value::Null);
    assert_eq!(render("{{ flag|yesno:'on,off' }}", &mut ctx), "on");
    assert_eq!(render("{{ nothing|yesno }}", &mut ctx), "maybe");
}

#[test]
fn test_date_filter() {
    let mut ctx = Context::new();
    ctx.insert("when", "2008-06-10 14:30:00");
    assert_eq!(render("{{ when|date:'%d %b %Y' }}", &mut ctx), "10 Jun 2008");
    assert_eq!(render("{{ when|date }}", &mut ctx), "2008-06-10");
    ctx.insert("junk", "not a date");
    assert_eq!(render("[{{ junk|date }}]", &mut ctx), "[]");
}

#[test]
fn test_urlencode() {
    let mut ctx = Context::new();
    ctx.insert("path", "/path to/x");
    assert_eq!(render("{{ path|urlencode }}", &mut ctx), "/path%20to/x");
    assert_eq!(render("{{ path|urlencode:'' }}", &mut ctx), "%2Fpath%20to%2Fx");
}

#[test]
fn test_safe_filters_preserve_safety_of_safe_input() {
    let mut ctx = Context::new();
    ctx.insert("markup", Value::safe("<b>x</b>"));
    // `upper` is marked safe, so safe input stays unescaped.
    assert_eq!(render("{{ markup|upper }}", &mut ctx), "<B>X</B>");
    // `cut` is not, so the result is escaped again.
    assert_eq!(
        render("{{ markup|cut:'x' }}", &mut ctx),
        "&lt;b&gt;&lt;/b&gt;"
    );
}

#[test]
fn test_force_escape_is_immediate() {
    let mut ctx = Context::new();
    ctx.insert("evil", "<i>");
    assert_eq!(
        render("{% autoescape off %}{{ evil|force_escape }}{% endautoescape %}", &mut ctx),
        "&lt;i&gt;"
    );
}

#[test]
fn test_string_literal_arguments_are_safe() {
    let mut ctx = Context::new();
    ctx.insert("nothing", Value::Null);
    // Literals written in the template never get escaped.
    assert_eq!(render("{{ nothing|default:'<hr>' }}", &mut ctx), "<hr>");
}

#[test]
fn test_bad_filter_argument_is_an_error() {
    let mut ctx = Context::new();
    ctx.insert("s", "x");
    let err = Template::new("{{ s|truncatechars:'no' }}")
        .unwrap()
        .render(&mut ctx)
        .unwrap_err();
    assert!(err.to_string().contains("truncatechars"));
}
