use stencil::{Config, Context, Engine};

#[test]
fn test_alternate_syntax_end_to_end() {
    let config = Config::from_toml(
        r##"
string_if_invalid = "??"

[syntax]
block_start = "<%"
block_end = "%>"
var_start = "<<"
var_end = ">>"
comment_start = "<#"
comment_end = "#>"
"##,
    )
    .unwrap();
    let engine = Engine::builder().config(&config).build();
    let template = engine
        .from_string("<% if x %><< x >><# note #><% endif %>{{ untouched }}")
        .unwrap();
    let mut ctx = Context::new();
    ctx.insert("x", 5i64);
    // The default delimiters are plain text under the alternate syntax.
    assert_eq!(template.render(&mut ctx).unwrap(), "5{{ untouched }}");
}

#[test]
fn test_config_file_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(stencil::config::CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        format!("dirs = [{:?}]\nautoescape = false\n", dir.path()),
    )
    .unwrap();
    std::fs::write(dir.path().join("a.html"), "{{ v }}").unwrap();

    let config = Config::from_path(&path).unwrap();
    let engine = Engine::builder().config(&config).build();
    let template = engine.get_template("a.html").unwrap();
    let mut ctx = Context::new();
    ctx.insert("v", "<raw>");
    assert_eq!(template.render(&mut ctx).unwrap(), "<raw>");
}

#[test]
fn test_missing_config_file() {
    assert!(Config::from_path("/no/such/stencil.toml").is_err());
}
