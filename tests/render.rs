use miya::{AutoEscape, Context, Environment, EnvironmentConfig, Error, MacroError, Value};
use serde_json::json;

fn render(source: &str) -> String {
    Environment::new().render_str(source, &Context::new()).unwrap()
}

fn render_json(source: &str, data: serde_json::Value) -> String {
    let ctx = Context::from_json(&data).unwrap();
    Environment::new().render_str(source, &ctx).unwrap()
}

fn escaping_env() -> Environment {
    Environment::with_config(EnvironmentConfig {
        autoescape: AutoEscape::Enabled(true),
        ..EnvironmentConfig::default()
    })
}

#[test]
fn test_literal_text_is_identity() {
    for text in [
        "",
        "plain text",
        "Hello, world!\n  indented line\n",
        "curly { braces } and % percent #",
        "unicode: héllo wörld ✓\n\n",
    ] {
        assert_eq!(render(text), text);
    }
}

#[test]
fn test_arithmetic() {
    assert_eq!(render("{{ 1 + 2 }}"), "3");
    assert_eq!(render("{{ 7 // 2 }}"), "3");
    assert_eq!(render("{{ 7 % 2 }}"), "1");
    assert_eq!(render("{{ 2 ** 10 }}"), "1024");
    assert_eq!(render("{{ 1.5 + 1 }}"), "2.5");
    assert_eq!(render("{{ 4 / 2 }}"), "2.0");
}

#[test]
fn test_filter_chain_is_left_associative() {
    assert_eq!(render("{{ 'Hi'|lower|upper }}"), "HI");
    assert_eq!(render("{{ 'a b c'|upper|replace(' ', '-')|lower }}"), "a-b-c");
}

#[test]
fn test_macro_argument_binding() {
    let env = Environment::new();
    let ctx = Context::new();
    let def = r#"{% macro greet(name, greeting="Hello") %}{{ greeting }} {{ name }}{% endmacro %}"#;

    let keyword = env.render_str(&format!("{def}{{{{ greet(name='World') }}}}"), &ctx);
    assert_eq!(keyword.unwrap(), "Hello World");

    let positional = env.render_str(&format!("{def}{{{{ greet('World', 'Hi') }}}}"), &ctx);
    assert_eq!(positional.unwrap(), "Hi World");

    let missing = env
        .render_str(&format!("{def}{{{{ greet() }}}}"), &ctx)
        .unwrap_err();
    assert!(matches!(
        missing.root(),
        Error::Macro(MacroError::MissingParameter { param, .. }) if param == "name"
    ));

    let unknown = env
        .render_str(&format!("{def}{{{{ greet('World', tone='dry') }}}}"), &ctx)
        .unwrap_err();
    assert!(matches!(
        unknown.root(),
        Error::Macro(MacroError::UnknownParameter { param, .. }) if param == "tone"
    ));

    let extra = env
        .render_str(&format!("{def}{{{{ greet('a', 'b', 'c') }}}}"), &ctx)
        .unwrap_err();
    assert!(matches!(extra.root(), Error::Macro(MacroError::TooManyArguments { .. })));
}

#[test]
fn test_recursive_loop_depth() {
    let tree = json!({
        "tree": [
            {"title": "a", "children": [
                {"title": "b", "children": [{"title": "c"}]},
                {"title": "d"}
            ]},
            {"title": "e"}
        ]
    });
    let source = "{% for item in tree recursive %}\
        {{ '-' * loop.depth0 }}{{ item.title }}|{{ loop.depth }};\
        {% if item.children %}{{ loop(item.children) }}{% endif %}\
        {% endfor %}";
    assert_eq!(render_json(source, tree), "a|1;-b|2;--c|3;-d|2;e|1;");
}

#[test]
fn test_autoescape() {
    let env = escaping_env();
    let ctx = Context::new();
    assert_eq!(env.render_str("{{ '<b>' }}", &ctx).unwrap(), "&lt;b&gt;");
    assert_eq!(env.render_str("{{ '<b>'|safe }}", &ctx).unwrap(), "<b>");
    assert_eq!(render("{{ '<b>' }}"), "<b>");
}

#[test]
fn test_autoescape_by_extension() {
    let env = Environment::with_config(EnvironmentConfig {
        autoescape: AutoEscape::html(),
        ..EnvironmentConfig::default()
    });
    env.add_template("page.html", "{{ v }}");
    env.add_template("page.txt", "{{ v }}");
    let mut ctx = Context::new();
    ctx.set("v", "a & b");
    assert_eq!(env.render_template("page.html", &ctx).unwrap(), "a &amp; b");
    assert_eq!(env.render_template("page.txt", &ctx).unwrap(), "a & b");
}

#[test]
fn test_whitespace_control() {
    assert_eq!(render("a {%- if true -%} b {%- endif -%} c"), "abc");
    assert_eq!(render("a {{- 'x' }} b"), "ax b");
    assert_eq!(render("a {# note -#}  b"), "a b");
}

#[test]
fn test_trim_and_lstrip_blocks() {
    let env = Environment::with_config(EnvironmentConfig {
        trim_blocks: true,
        lstrip_blocks: true,
        ..EnvironmentConfig::default()
    });
    let source = "<ul>\n  {% for x in [1, 2] %}\n  <li>{{ x }}</li>\n  {% endfor %}\n</ul>";
    assert_eq!(
        env.render_str(source, &Context::new()).unwrap(),
        "<ul>\n  <li>1</li>\n  <li>2</li>\n</ul>"
    );
}

#[test]
fn test_namespace_persists_across_iterations() {
    let source = "{% set ns = namespace(total=0) %}{% set count = 0 %}\
        {% for price in [10, 20, 30] %}\
        {% set ns.total = ns.total + price %}{% set count = count + 1 %}\
        {% endfor %}{{ ns.total }} {{ count }}";
    assert_eq!(render(source), "60 0");
}

#[test]
fn test_comprehension() {
    assert_eq!(render("{{ [x * 2 for x in [1, 2, 3] if x % 2 == 1] }}"), "[2, 6]");
}

#[test]
fn test_value_formatting() {
    assert_eq!(render("{{ none }}|{{ missing }}|{{ true }}|{{ 2.0 }}"), "||true|2.0");
    assert_eq!(render("{{ ['a', 1] }}"), "['a', 1]");
    assert_eq!(render("{{ {'k': none} }}"), "{'k': none}");
}

#[test]
fn test_loop_helpers() {
    assert_eq!(
        render("{% for x in 'abc' %}{{ loop.cycle('o', 'e') }}{% endfor %}"),
        "oeo"
    );
    assert_eq!(
        render("{% for x in [1, 1, 2] %}{% if loop.changed(x) %}{{ x }}{% endif %}{% endfor %}"),
        "12"
    );
    assert_eq!(
        render("{% for x in range(10) %}{% if x is odd %}{% continue %}{% endif %}{% if x > 6 %}{% break %}{% endif %}{{ x }}{% endfor %}"),
        "0246"
    );
}

#[test]
fn test_call_block() {
    let source = "{% macro list(items) %}<ul>{% for i in items %}{{ caller(i) }}{% endfor %}</ul>{% endmacro %}\
        {% call(item) list([1, 2]) %}<li>{{ item }}</li>{% endcall %}";
    assert_eq!(render(source), "<ul><li>1</li><li>2</li></ul>");
}

#[test]
fn test_slicing_and_methods() {
    assert_eq!(render("{{ [1, 2, 3, 4][1:3] }}"), "[2, 3]");
    assert_eq!(render("{{ 'hello'[::-1] }}"), "olleh");
    assert_eq!(render("{{ [1, 2, 3][2::9223372036854775807] }}"), "[3]");
    assert_eq!(render("{{ ' a,b '.strip().split(',') }}"), "['a', 'b']");
    assert_eq!(
        render("{% for k, v in {'x': 1, 'y': 2}.items() %}{{ k }}={{ v }};{% endfor %}"),
        "x=1;y=2;"
    );
    assert_eq!(render("{{ {'a': 1}.get('b', 'none') }}"), "none");
}

#[test]
fn test_builtin_filters_in_templates() {
    let data = json!({
        "users": [
            {"name": "bob", "age": 31, "team": "b"},
            {"name": "alice", "age": 25, "team": "a"},
            {"name": "carol", "age": 40, "team": "a"}
        ]
    });
    let source = "{{ users|map(attribute='name')|sort|join(', ') }}\n\
        {{ users|selectattr('age', 'gt', 30)|map(attribute='name')|list }}\n\
        {{ users|sum(attribute='age') }}\n\
        {% for team, members in users|groupby('team') %}{{ team }}:{{ members|length }} {% endfor %}";
    assert_eq!(
        render_json(source, data),
        "alice, bob, carol\n['bob', 'carol']\n96\na:2 b:1 "
    );
}

#[test]
fn test_render_serializable_data() {
    #[derive(serde::Serialize)]
    struct Page {
        title: String,
        tags: Vec<String>,
    }

    let env = Environment::new();
    env.add_template("page", "{{ title }}: {{ tags|join(' ') }}");
    let page = Page {
        title: "Notes".to_string(),
        tags: vec!["rust".to_string(), "jinja".to_string()],
    };
    assert_eq!(env.render("page", &page).unwrap(), "Notes: rust jinja");
}

#[test]
fn test_custom_filter_test_and_function() {
    let env = Environment::new();
    env.add_filter("double", |v: &Value, _: &[Value], _: &miya::Kwargs| {
        Ok(Value::Int(v.as_i64().unwrap_or(0) * 2))
    });
    env.add_test("positive", |v: &Value, _: &[Value]| Ok(v.as_i64().map_or(false, |n| n > 0)));
    env.add_function("answer", |_: &[Value], _: &miya::Kwargs| Ok(Value::Int(42)));
    env.add_global("site", "miya");

    let out = env
        .render_str(
            "{{ 4|double }} {{ 3 is positive }} {{ answer() }} {{ site }}",
            &Context::new(),
        )
        .unwrap();
    assert_eq!(out, "8 true 42 miya");
}
