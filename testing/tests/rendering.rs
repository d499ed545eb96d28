use stencil::{Context, Engine, Template, Value};

fn render(source: &str, ctx: &mut Context) -> String {
    Template::new(source).unwrap().render(ctx).unwrap()
}

#[test]
fn test_hello_world() {
    let mut ctx = Context::new();
    ctx.insert("name", "World");
    assert_eq!(render("Hello {{ name }}!", &mut ctx), "Hello World!");
}

#[test]
fn test_render_data() {
    let template = Template::new("Hello {{ name }}!").unwrap();
    let data = stencil::to_value(serde_json::json!({ "name": "world" })).unwrap();
    assert_eq!(template.render_data(Some(data)).unwrap(), "Hello world!");
    assert_eq!(template.render_data(None).unwrap(), "Hello !");
    assert!(template.render_data(Some(Value::Int(3))).is_err());
}

#[test]
fn test_text_only_round_trips() {
    let source = "no tags here, just text\nwith a newline { and a stray brace";
    assert_eq!(render(source, &mut Context::new()), source);
}

#[test]
fn test_rendering_is_idempotent() {
    let template = Template::new("{% if x %}{{ x }}{% endif %} {{ y|default:'-' }}").unwrap();
    let mut ctx = Context::new();
    ctx.insert("x", 3i64);
    let first = template.render(&mut ctx).unwrap();
    let second = template.render(&mut ctx).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_if_else_with_missing_variable() {
    let source = "{% if a %}yes{% else %}no{% endif %}";
    let mut ctx = Context::new();
    ctx.insert("a", false);
    assert_eq!(render(source, &mut ctx), "no");
    // A missing operand resolves falsy instead of erroring.
    assert_eq!(render(source, &mut Context::new()), "no");
}

#[test]
fn test_if_elif_chain() {
    let source = "{% if a %}a{% elif b %}b{% elif c %}c{% else %}none{% endif %}";
    let mut ctx = Context::new();
    ctx.insert("b", 1i64);
    assert_eq!(render(source, &mut ctx), "b");
    assert_eq!(render(source, &mut Context::new()), "none");
}

#[test]
fn test_if_boolean_connectives() {
    let mut ctx = Context::new();
    ctx.insert("a", true);
    ctx.insert("b", false);
    assert_eq!(render("{% if a and b %}x{% else %}y{% endif %}", &mut ctx), "y");
    assert_eq!(render("{% if a or b %}x{% else %}y{% endif %}", &mut ctx), "x");
    assert_eq!(render("{% if not b %}x{% endif %}", &mut ctx), "x");
    assert!(Template::new("{% if a and b or c %}x{% endif %}").is_err());
}

#[test]
fn test_ifequal_and_ifnotequal() {
    let mut ctx = Context::new();
    ctx.insert("a", 1i64);
    ctx.insert("b", "1");
    assert_eq!(
        render("{% ifequal a 1 %}same{% endifequal %}", &mut ctx),
        "same"
    );
    // Numbers never equal strings.
    assert_eq!(
        render(
            "{% ifequal a b %}same{% else %}different{% endifequal %}",
            &mut ctx
        ),
        "different"
    );
    assert_eq!(
        render("{% ifnotequal a 2 %}yep{% endifnotequal %}", &mut ctx),
        "yep"
    );
}

#[test]
fn test_autoescape_and_safety() {
    let mut ctx = Context::new();
    ctx.insert("evil", "<script>");
    assert_eq!(render("{{ evil }}", &mut ctx), "&lt;script&gt;");
    assert_eq!(render("{{ evil|safe }}", &mut ctx), "<script>");
    assert_eq!(
        render("{% autoescape off %}{{ evil }}{% endautoescape %}", &mut ctx),
        "<script>"
    );
    // `escape` forces escaping even with autoescaping off, and only once.
    assert_eq!(
        render(
            "{% autoescape off %}{{ evil|escape|escape }}{% endautoescape %}",
            &mut ctx
        ),
        "&lt;script&gt;"
    );
}

#[test]
fn test_safe_values_survive_storage() {
    let mut ctx = Context::new();
    ctx.insert("markup", Value::safe("<b>bold</b>"));
    assert_eq!(render("{{ markup }}", &mut ctx), "<b>bold</b>");
}

#[test]
fn test_invalid_string_sentinel() {
    let engine = Engine::builder().string_if_invalid("INVALID").build();
    let template = engine.from_string("[{{ missing }}]").unwrap();
    assert_eq!(template.render(&mut Context::new()).unwrap(), "[INVALID]");

    // The sentinel short-circuits the filter pipeline.
    let template = engine.from_string("[{{ missing|upper }}]").unwrap();
    assert_eq!(template.render(&mut Context::new()).unwrap(), "[INVALID]");

    let engine = Engine::builder().string_if_invalid("?%s?").build();
    let template = engine.from_string("{{ user.name }}").unwrap();
    assert_eq!(template.render(&mut Context::new()).unwrap(), "?user.name?");
}

#[test]
fn test_strict_mode_surfaces_misses() {
    let template = Template::new("{{ missing }}").unwrap();
    let mut ctx = Context::new();
    ctx.strict = true;
    let err = template.render(&mut ctx).unwrap_err();
    assert!(err.to_string().contains("missing"));
}

#[test]
fn test_comment_tag_and_comment_token() {
    let mut ctx = Context::new();
    assert_eq!(render("a{# inline note #}b", &mut ctx), "ab");
    assert_eq!(
        render("a{% comment %}anything {{ x }} here{% endcomment %}b", &mut ctx),
        "ab"
    );
}

#[test]
fn test_with_tag() {
    let mut ctx = Context::new();
    ctx.insert("user", Value::from("ada"));
    assert_eq!(
        render("{% with name=user greeting=\"hi\" %}{{ greeting }} {{ name }}{% endwith %}", &mut ctx),
        "hi ada"
    );
    // Bindings vanish after the block.
    assert_eq!(render("{{ name }}", &mut ctx), "");
    assert_eq!(
        render("{% with user as name %}{{ name }}{% endwith %}", &mut ctx),
        "ada"
    );
}

#[test]
fn test_firstof() {
    let mut ctx = Context::new();
    ctx.insert("b", "found");
    assert_eq!(render("{% firstof a b 'fallback' %}", &mut ctx), "found");
    assert_eq!(
        render("{% firstof a c 'fallback' %}", &mut ctx),
        "fallback"
    );
}

#[test]
fn test_spaceless() {
    let mut ctx = Context::new();
    assert_eq!(
        render(
            "{% spaceless %}<p>\n  <a>text with space</a>\n</p>{% endspaceless %}",
            &mut ctx
        ),
        "<p><a>text with space</a></p>"
    );
}

#[test]
fn test_filter_block() {
    let mut ctx = Context::new();
    ctx.insert("who", "world");
    assert_eq!(
        render("{% filter upper %}hello {{ who }}{% endfilter %}", &mut ctx),
        "HELLO WORLD"
    );
    assert!(Template::new("{% filter safe %}x{% endfilter %}").is_err());
}

#[test]
fn test_templatetag() {
    let mut ctx = Context::new();
    assert_eq!(
        render("{% templatetag openvariable %}x{% templatetag closevariable %}", &mut ctx),
        "{{x}}"
    );
}

#[test]
fn test_widthratio() {
    let mut ctx = Context::new();
    ctx.insert("value", 175i64);
    assert_eq!(render("{% widthratio value 200 100 %}", &mut ctx), "88");
    assert_eq!(render("{% widthratio value 0 100 %}", &mut ctx), "0");
    assert_eq!(
        render("{% widthratio value 200 100 as w %}[{{ w }}]", &mut ctx),
        "[88]"
    );
}

#[test]
fn test_parse_errors() {
    let err = Template::new("{% unknowntag %}").unwrap_err();
    assert!(err.to_string().contains("Invalid block tag"));
    let err = Template::new("{% if x %}no end").unwrap_err();
    assert!(err.to_string().contains("Unclosed tag"));
    let err = Template::new("{{ broken").unwrap_err();
    assert!(err.to_string().contains("unterminated"));
    let err = Template::new("line1\nline2\n{% bogus %}").unwrap_err();
    assert!(err.to_string().contains("line 3"));
}

#[test]
fn test_callables_in_paths() {
    use std::sync::Arc;
    use stencil::HostFn;

    let mut ctx = Context::new();
    ctx.insert(
        "answer",
        Value::Func(Arc::new(HostFn::new(|| Ok(Value::Int(42))))),
    );
    assert_eq!(render("{{ answer }}", &mut ctx), "42");

    let mut ctx = Context::new();
    ctx.insert(
        "dangerous",
        Value::Func(Arc::new(
            HostFn::new(|| Ok(Value::str("boom"))).alters_data(),
        )),
    );
    // Side-effecting callables never run; the lookup fails soft.
    assert_eq!(render("[{{ dangerous }}]", &mut ctx), "[]");
}
