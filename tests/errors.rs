use miya::{Context, Environment, EnvironmentConfig, Error, InheritanceError};

fn render_err(source: &str) -> Error {
    Environment::new()
        .render_str(source, &Context::new())
        .unwrap_err()
}

#[test]
fn test_lex_errors_report_position() {
    match render_err("line one\n{{ 'unterminated") {
        Error::Lex { line, .. } => assert_eq!(line, 2),
        other => panic!("expected a lex error, got {other:?}"),
    }
    assert!(matches!(render_err("{# open comment"), Error::Lex { .. }));
}

#[test]
fn test_parse_errors() {
    for source in [
        "{% if x %}",
        "{% for x in y %}{% endif %}",
        "{{ 1 + }}",
        "{% set a[0] = 1 %}",
        "{% endblock %}",
        "{% unknown %}",
        "{% for i in [1, 2, 3] %}{% filter upper %}x{{ i }}{% break %}{% endfilter %}{% endfor %}",
        "{% for i in [1, 2, 3] %}{% set s %}{% break %}{% endset %}{{ i }}{% endfor %}",
    ] {
        let err = render_err(source);
        assert!(
            matches!(err, Error::Parse { .. }),
            "{source:?} gave {err:?}"
        );
    }
}

#[test]
fn test_loops_inside_captured_bodies_still_break() {
    let out = Environment::new()
        .render_str(
            "{% filter upper %}{% for i in 'abc' %}{{ i }}{% if i == 'b' %}{% break %}{% endif %}{% endfor %}{% endfilter %}",
            &Context::new(),
        )
        .unwrap();
    assert_eq!(out, "AB");
}

#[test]
fn test_unknown_filter_and_test() {
    assert!(matches!(
        render_err("{{ 1|frobnicate }}").root(),
        Error::UnknownFilter(name) if name == "frobnicate"
    ));
    assert!(matches!(
        render_err("{{ 1 is frobnicated }}").root(),
        Error::UnknownTest(name) if name == "frobnicated"
    ));
}

#[test]
fn test_execution_errors_name_the_callee() {
    assert!(matches!(
        render_err("{{ 'x'|int(base=99) }}").root(),
        Error::FilterExecution { name, .. } if name == "int"
    ));
    assert!(matches!(
        render_err("{{ 1 is divisibleby(0) }}").root(),
        Error::TestExecution { name, .. } if name == "divisibleby"
    ));
    assert!(matches!(
        render_err("{{ range(1, 2, 0) }}").root(),
        Error::FunctionExecution { name, .. } if name == "range"
    ));
}

#[test]
fn test_oversized_filter_arguments() {
    for (source, filter) in [
        ("{{ 'a'|center(100000000000) }}", "center"),
        ("{{ 'a'|indent(100000000000) }}", "indent"),
        ("{{ [1, 2]|batch(100000000000, 0) }}", "batch"),
        ("{{ [1, 2]|slice(100000000000) }}", "slice"),
        ("{{ [1, 2]|tojson(100000000000) }}", "tojson"),
        ("{{ '%999999999999s'|format('a') }}", "format"),
    ] {
        let err = render_err(source);
        assert!(
            matches!(err.root(), Error::FilterExecution { name, .. } if name == filter),
            "{source:?} gave {err:?}"
        );
    }
}

#[test]
fn test_invalid_operations() {
    for source in [
        "{{ 1 / 0 }}",
        "{{ 1 // 0 }}",
        "{{ 'a' - 1 }}",
        "{{ missing + 1 }}",
        "{% set a, b = [1, 2, 3] %}",
        "{% set x = 1 %}{% set x.y = 2 %}",
        "{% for x in 42 %}{% endfor %}",
    ] {
        let err = render_err(source);
        assert!(
            matches!(err.root(), Error::InvalidOperation(_)),
            "{source:?} gave {err:?}"
        );
    }
}

#[test]
fn test_not_callable() {
    assert!(matches!(
        render_err("{% set x = 3 %}{{ x() }}").root(),
        Error::NotCallable(_)
    ));
}

#[test]
fn test_strict_undefined() {
    let env = Environment::with_config(EnvironmentConfig {
        strict_undefined: true,
        ..EnvironmentConfig::default()
    });
    let ctx = Context::new();

    let err = env.render_str("{{ user.name }}", &ctx).unwrap_err();
    assert!(matches!(err.root(), Error::UndefinedVariable(name) if name == "user"));

    assert_eq!(
        env.render_str(
            "{{ user is defined }} {{ user is undefined }} {{ user|default('anon') }}",
            &ctx
        )
        .unwrap(),
        "false true anon"
    );
}

#[test]
fn test_render_errors_carry_location() {
    let env = Environment::new();
    env.add_template("page.html", "ok\n\n{{ 1|nope }}");
    let err = env.render_template("page.html", &Context::new()).unwrap_err();
    match &err {
        Error::Located { template, line, .. } => {
            assert_eq!(template, "page.html");
            assert_eq!(*line, 3);
        }
        other => panic!("expected a located error, got {other:?}"),
    }
    assert!(err.to_string().contains("page.html"));
}

#[test]
fn test_errors_inside_includes_point_at_the_included_template() {
    let env = Environment::new();
    env.add_template("outer.html", "{% include 'inner.html' %}");
    env.add_template("inner.html", "\n{{ 1 // 0 }}");
    let err = env.render_template("outer.html", &Context::new()).unwrap_err();
    match &err {
        Error::Located { template, line, .. } => {
            assert_eq!(template, "inner.html");
            assert_eq!(*line, 2);
        }
        other => panic!("expected a located error, got {other:?}"),
    }
}

#[test]
fn test_super_outside_block() {
    assert!(matches!(
        render_err("{{ super() }}").root(),
        Error::Inheritance(InheritanceError::SuperOutsideBlock)
    ));
}

#[test]
fn test_recursion_limit() {
    let env = Environment::with_config(EnvironmentConfig {
        max_recursion: 20,
        ..EnvironmentConfig::default()
    });
    let err = env
        .render_str(
            "{% macro down(n) %}{{ down(n + 1) }}{% endmacro %}{{ down(0) }}",
            &Context::new(),
        )
        .unwrap_err();
    assert!(matches!(err.root(), Error::InvalidOperation(msg) if msg.contains("recursion")));

    env.add_template("loop.html", "{% include 'loop.html' %}");
    assert!(env.render_template("loop.html", &Context::new()).is_err());
}

#[test]
fn test_failed_render_leaves_environment_usable() {
    let env = Environment::new();
    env.add_template("bad.html", "{{ 1 // 0 }}");
    env.add_template("good.html", "fine");
    assert!(env.render_template("bad.html", &Context::new()).is_err());
    assert_eq!(env.render_template("good.html", &Context::new()).unwrap(), "fine");
}
