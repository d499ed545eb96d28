use stencil::{Context, Engine, LocmemLoader, Template};

fn engine(templates: &[(&str, &str)]) -> Engine {
    Engine::builder()
        .loader(LocmemLoader::new(templates.iter().copied()))
        .build()
}

fn render(engine: &Engine, name: &str) -> String {
    engine
        .get_template(name)
        .unwrap()
        .render(&mut Context::new())
        .unwrap()
}

#[test]
fn test_block_override() {
    let engine = engine(&[
        ("base.html", "<title>{% block title %}default{% endblock %}</title>"),
        (
            "child.html",
            "{% extends 'base.html' %}{% block title %}custom{% endblock %}",
        ),
    ]);
    assert_eq!(render(&engine, "base.html"), "<title>default</title>");
    assert_eq!(render(&engine, "child.html"), "<title>custom</title>");
}

#[test]
fn test_unoverridden_block_keeps_parent_content() {
    let engine = engine(&[
        (
            "base.html",
            "{% block a %}A{% endblock %}|{% block b %}B{% endblock %}",
        ),
        (
            "child.html",
            "{% extends 'base.html' %}{% block b %}beta{% endblock %}",
        ),
    ]);
    assert_eq!(render(&engine, "child.html"), "A|beta");
}

#[test]
fn test_overridden_ancestor_block_still_runs_for_super() {
    let engine = engine(&[
        ("base.html", "{% block b %}{% cycle 'a' 'b' 'c' %}{% endblock %}"),
        (
            "child.html",
            "{% extends 'base.html' %}{% block b %}x{% endblock %}",
        ),
    ]);
    // The parent body runs each time to produce block.super, advancing
    // its cycle even though the override never uses it.
    assert_eq!(render(&engine, "child.html"), "x");
    assert_eq!(render(&engine, "child.html"), "x");
    assert_eq!(render(&engine, "base.html"), "c");
}

#[test]
fn test_block_super() {
    let engine = engine(&[
        ("base.html", "{% block main %}base{% endblock %}"),
        (
            "mid.html",
            "{% extends 'base.html' %}{% block main %}{{ block.super }}+mid{% endblock %}",
        ),
        (
            "leaf.html",
            "{% extends 'mid.html' %}{% block main %}{{ block.super }}+leaf{% endblock %}",
        ),
    ]);
    assert_eq!(render(&engine, "mid.html"), "base+mid");
    assert_eq!(render(&engine, "leaf.html"), "base+mid+leaf");
}

#[test]
fn test_block_name_variable() {
    let engine = engine(&[
        ("base.html", "{% block main %}x{% endblock %}"),
        (
            "child.html",
            "{% extends 'base.html' %}{% block main %}[{{ block.name }}]{% endblock %}",
        ),
    ]);
    assert_eq!(render(&engine, "child.html"), "[main]");
}

#[test]
fn test_nested_blocks() {
    let engine = engine(&[
        (
            "base.html",
            "{% block outer %}o({% block inner %}i{% endblock %}){% endblock %}",
        ),
        (
            "child.html",
            "{% extends 'base.html' %}{% block inner %}I{% endblock %}",
        ),
    ]);
    assert_eq!(render(&engine, "child.html"), "o(I)");
}

#[test]
fn test_extends_variable_parent() {
    let engine = engine(&[
        ("base.html", "{% block t %}B{% endblock %}"),
        (
            "child.html",
            "{% extends parent %}{% block t %}C{% endblock %}",
        ),
    ]);
    let template = engine.get_template("child.html").unwrap();
    let mut ctx = Context::new();
    ctx.insert("parent", "base.html");
    assert_eq!(template.render(&mut ctx).unwrap(), "C");
}

#[test]
fn test_extends_must_be_first() {
    assert!(Template::new("{{ x }}{% extends 'base.html' %}").is_err());
    assert!(Template::new("{% now 'y' %}{% extends 'base.html' %}").is_err());
    // Leading text and comments are allowed before it.
    let engine = engine(&[
        ("base.html", "ok"),
        ("child.html", "{# note #}  \n{% extends 'base.html' %}"),
    ]);
    assert_eq!(render(&engine, "child.html").trim(), "ok");
}

#[test]
fn test_double_extends_rejected() {
    let err = Template::new("{% extends 'a' %}{% extends 'b' %}").unwrap_err();
    assert!(err.to_string().contains("extends"));
}

#[test]
fn test_duplicate_block_rejected() {
    let err = Template::new("{% block a %}{% endblock %}{% block a %}{% endblock %}").unwrap_err();
    assert!(err.to_string().contains("'block' tag with name 'a' appears more than once"));
}

#[test]
fn test_endblock_name_must_match() {
    assert!(Template::new("{% block a %}x{% endblock a %}").is_ok());
    assert!(Template::new("{% block a %}x{% endblock b %}").is_err());
}

#[test]
fn test_include() {
    let engine = engine(&[
        ("snippet.html", "hi {{ name }}"),
        ("page.html", "[{% include 'snippet.html' %}]"),
    ]);
    let template = engine.get_template("page.html").unwrap();
    let mut ctx = Context::new();
    ctx.insert("name", "ada");
    assert_eq!(template.render(&mut ctx).unwrap(), "[hi ada]");
}

#[test]
fn test_include_with_and_only() {
    let engine = engine(&[
        ("snippet.html", "{{ a }}{{ b }}"),
        ("with.html", "{% include 'snippet.html' with a='x' %}"),
        ("only.html", "{% include 'snippet.html' with a='x' only %}"),
    ]);
    let mut ctx = Context::new();
    ctx.insert("a", "1");
    ctx.insert("b", "2");
    let template = engine.get_template("with.html").unwrap();
    assert_eq!(template.render(&mut ctx).unwrap(), "x2");
    let template = engine.get_template("only.html").unwrap();
    assert_eq!(template.render(&mut ctx).unwrap(), "x");
}

#[test]
fn test_include_variable_name() {
    let engine = engine(&[("snippet.html", "ok")]);
    let template = engine.from_string("{% include which %}").unwrap();
    let mut ctx = Context::new();
    ctx.insert("which", "snippet.html");
    assert_eq!(template.render(&mut ctx).unwrap(), "ok");
}

#[test]
fn test_include_inside_inherited_block() {
    let engine = engine(&[
        ("base.html", "{% block body %}{% endblock %}"),
        ("part.html", "part"),
        (
            "child.html",
            "{% extends 'base.html' %}{% block body %}<{% include 'part.html' %}>{% endblock %}",
        ),
    ]);
    assert_eq!(render(&engine, "child.html"), "<part>");
}

#[test]
fn test_extends_without_engine_fails_at_render() {
    let template = Template::new("{% extends 'base.html' %}").unwrap();
    assert!(template.render(&mut Context::new()).is_err());
}
