use serde_json::json;
use stencil::{to_value, Context, Template};

fn render(source: &str, ctx: &mut Context) -> String {
    Template::new(source).unwrap().render(ctx).unwrap()
}

fn items(ctx: &mut Context, values: serde_json::Value) {
    ctx.insert("items", to_value(values).unwrap());
}

#[test]
fn test_basic_loop() {
    let mut ctx = Context::new();
    items(&mut ctx, json!([1, 2, 3]));
    assert_eq!(
        render("{% for x in items %}{{ x }},{% endfor %}", &mut ctx),
        "1,2,3,"
    );
}

#[test]
fn test_forloop_counters() {
    let mut ctx = Context::new();
    items(&mut ctx, json!(["a", "b", "c", "d"]));
    assert_eq!(
        render(
            "{% for x in items %}{{ forloop.counter }}:{{ forloop.counter0 }} {% endfor %}",
            &mut ctx
        ),
        "1:0 2:1 3:2 4:3 "
    );
    // counter + revcounter is always len + 1.
    assert_eq!(
        render(
            "{% for x in items %}{{ forloop.revcounter }}:{{ forloop.revcounter0 }} {% endfor %}",
            &mut ctx
        ),
        "4:3 3:2 2:1 1:0 "
    );
    assert_eq!(
        render(
            "{% for x in items %}{% if forloop.first %}F{% endif %}{% if forloop.last %}L{% endif %}{{ x }}{% endfor %}",
            &mut ctx
        ),
        "FabcLd"
    );
}

#[test]
fn test_loop_over_string_and_map() {
    let mut ctx = Context::new();
    ctx.insert("word", "abc");
    assert_eq!(
        render("{% for c in word %}[{{ c }}]{% endfor %}", &mut ctx),
        "[a][b][c]"
    );
    ctx.insert("data", to_value(json!({"x": 1, "z": 3, "y": 2})).unwrap());
    // Maps iterate over their keys in sorted order.
    assert_eq!(
        render("{% for k in data %}{{ k }} {% endfor %}", &mut ctx),
        "x y z "
    );
}

#[test]
fn test_reversed_and_empty() {
    let mut ctx = Context::new();
    items(&mut ctx, json!([1, 2, 3]));
    assert_eq!(
        render("{% for x in items reversed %}{{ x }}{% endfor %}", &mut ctx),
        "321"
    );
    assert_eq!(
        render(
            "{% for x in nothing %}{{ x }}{% empty %}none{% endfor %}",
            &mut ctx
        ),
        "none"
    );
    items(&mut ctx, json!([]));
    assert_eq!(
        render(
            "{% for x in items %}{{ x }}{% empty %}none{% endfor %}",
            &mut ctx
        ),
        "none"
    );
}

#[test]
fn test_unpacking() {
    let mut ctx = Context::new();
    items(&mut ctx, json!([[1, "one"], [2, "two"]]));
    assert_eq!(
        render("{% for n, s in items %}{{ n }}={{ s }};{% endfor %}", &mut ctx),
        "1=one;2=two;"
    );
    items(&mut ctx, json!([[1, 2, 3]]));
    let err = Template::new("{% for a, b in items %}{% endfor %}")
        .unwrap()
        .render(&mut ctx)
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("Need 2 values to unpack in for loop; got 3"));
}

#[test]
fn test_parentloop() {
    let mut ctx = Context::new();
    items(&mut ctx, json!([["a", "b"], ["c"]]));
    assert_eq!(
        render(
            "{% for row in items %}{% for cell in row %}{{ forloop.parentloop.counter }}.{{ forloop.counter }} {% endfor %}{% endfor %}",
            &mut ctx
        ),
        "1.1 1.2 2.1 "
    );
}

#[test]
fn test_cycle_state_persists_across_renders() {
    let template = Template::new("{% cycle 'a' 'b' 'c' %}").unwrap();
    let mut ctx = Context::new();
    let outputs: Vec<String> = (0..4).map(|_| template.render(&mut ctx).unwrap()).collect();
    assert_eq!(outputs, ["a", "b", "c", "a"]);
}

#[test]
fn test_cycle_in_loop() {
    let mut ctx = Context::new();
    items(&mut ctx, json!([1, 2, 3, 4]));
    assert_eq!(
        render(
            "{% for x in items %}{% cycle 'odd' 'even' %} {% endfor %}",
            &mut ctx
        ),
        "odd even odd even "
    );
}

#[test]
fn test_named_and_silent_cycles() {
    let mut ctx = Context::new();
    items(&mut ctx, json!([1, 2, 3]));
    assert_eq!(
        render(
            "{% for x in items %}{% cycle 'a' 'b' as row %}{{ row }}{% endfor %}",
            &mut ctx
        ),
        "aabbaa"
    );
    assert_eq!(
        render(
            "{% for x in items %}{% cycle 'a' 'b' as row silent %}[{{ row }}]{% endfor %}",
            &mut ctx
        ),
        "[a][b][a]"
    );
    assert!(Template::new("{% cycle 'a' 'b' silent %}").is_err());
}

#[test]
fn test_resetcycle() {
    let mut ctx = Context::new();
    items(&mut ctx, json!([1, 2, 3]));
    assert_eq!(
        render(
            "{% for x in items %}{% cycle 'a' 'b' 'c' %}{% resetcycle %}{% endfor %}",
            &mut ctx
        ),
        "aaa"
    );
}

#[test]
fn test_ifchanged() {
    let mut ctx = Context::new();
    items(&mut ctx, json!([1, 1, 2, 2, 3]));
    assert_eq!(
        render(
            "{% for x in items %}{% ifchanged %}{{ x }}{% endifchanged %}{% endfor %}",
            &mut ctx
        ),
        "123"
    );
    assert_eq!(
        render(
            "{% for x in items %}{% ifchanged x %}!{% else %}.{% endifchanged %}{% endfor %}",
            &mut ctx
        ),
        "!.!.!"
    );
    // The state resets between outer renders.
    let template =
        Template::new("{% for x in items %}{% ifchanged %}{{ x }}{% endifchanged %}{% endfor %}")
            .unwrap();
    assert_eq!(template.render(&mut ctx).unwrap(), "123");
    assert_eq!(template.render(&mut ctx).unwrap(), "123");
}

#[test]
fn test_regroup_preserves_order_within_groups() {
    let mut ctx = Context::new();
    ctx.insert(
        "people",
        to_value(json!([
            {"name": "ada", "city": "london"},
            {"name": "bob", "city": "london"},
            {"name": "cyd", "city": "paris"},
            {"name": "dee", "city": "london"},
        ]))
        .unwrap(),
    );
    let out = render(
        "{% regroup people by city as groups %}\
         {% for g in groups %}{{ g.grouper }}:{% for p in g.list %}{{ p.name }},{% endfor %};{% endfor %}",
        &mut ctx,
    );
    // Grouping is over consecutive runs only; london appears twice.
    assert_eq!(out, "london:ada,bob,;paris:cyd,;london:dee,;");

    // Concatenating the group lists reproduces the input order.
    let flattened = render(
        "{% regroup people by city as groups %}\
         {% for g in groups %}{% for p in g.list %}{{ p.name }} {% endfor %}{% endfor %}",
        &mut ctx,
    );
    assert_eq!(flattened, "ada bob cyd dee ");
}

#[test]
fn test_regroup_missing_target() {
    let mut ctx = Context::new();
    assert_eq!(
        render(
            "{% regroup absent by x as groups %}{% for g in groups %}!{% endfor %}ok",
            &mut ctx
        ),
        "ok"
    );
}

#[test]
fn test_for_parse_errors() {
    assert!(Template::new("{% for x %}{% endfor %}").is_err());
    assert!(Template::new("{% for x on items %}{% endfor %}").is_err());
}
