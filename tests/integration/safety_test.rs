//! Safety gate tests over realistic payroll queries.

use erp_agent::safety::{validate_sql, RejectionKind, SafetyGate};

#[test]
fn test_realistic_read_queries_pass() {
    let gate = SafetyGate::new();
    let queries = [
        "SELECT COUNT(*) FROM employees WHERE hire_date >= DATE '2024-01-01'",
        "WITH months AS (\n  SELECT generate_series(DATE '2024-01-01', DATE '2024-12-01', interval '1 month')::date AS month\n)\nSELECT m.month, SUM(s.amount) FROM months m JOIN salaries s ON date_trunc('month', s.pay_date) = m.month GROUP BY m.month",
        "SELECT e.name, s.amount FROM employees e JOIN salaries s ON s.employee_id = e.employee_id WHERE e.department_id IN (SELECT department_id FROM departments WHERE name = 'Finance') ORDER BY s.amount DESC LIMIT 10;",
        "-- headcount by department\nSELECT d.name, COUNT(*) FROM departments d JOIN employees e USING (department_id) GROUP BY d.name HAVING COUNT(*) > 5",
        "SELECT name FROM employees WHERE name ILIKE '%o''brien%'",
    ];

    for sql in queries {
        let verdict = gate.check(sql);
        assert!(verdict.accepted, "expected {sql:?} to pass: {}", verdict.message);
    }
}

#[test]
fn test_write_statements_are_rejected() {
    for sql in [
        "DELETE FROM employees",
        "UPDATE salaries SET amount = 0",
        "INSERT INTO employees (name) VALUES ('x')",
        "TRUNCATE attendance",
        "GRANT ALL ON employees TO public",
    ] {
        let verdict = validate_sql(sql);
        assert!(!verdict.accepted, "expected {sql:?} to be rejected");
        assert!(matches!(
            verdict.rejection,
            Some(RejectionKind::NotReadOnly { .. })
        ));
    }
}

#[test]
fn test_hidden_write_after_select_is_rejected() {
    let verdict = validate_sql("WITH x AS (DELETE FROM employees RETURNING *) SELECT * FROM x");
    assert!(matches!(
        verdict.rejection,
        Some(RejectionKind::ForbiddenKeyword { ref keyword }) if keyword == "DELETE"
    ));

    let verdict = validate_sql("SELECT 1 FROM t; DROP TABLE employees");
    assert!(!verdict.accepted);
}

#[test]
fn test_comment_markers_in_literals_cannot_hide_writes() {
    for sql in [
        "WITH y AS (SELECT '--' AS s), d AS (DELETE FROM payroll RETURNING 1) SELECT s\n, ')' AS z FROM y",
        "SELECT '/*' AS s FROM employees; UPDATE salaries SET amount = 0; SELECT '*/'",
        "SELECT \"--\" FROM employees; TRUNCATE attendance",
    ] {
        let verdict = validate_sql(sql);
        assert!(!verdict.accepted, "expected {sql:?} to be rejected");
        assert!(matches!(
            verdict.rejection,
            Some(RejectionKind::ForbiddenKeyword { .. })
        ));
    }
}

#[test]
fn test_forbidden_words_inside_literals_are_data() {
    let verdict = validate_sql(
        "SELECT changed_at FROM audit_log WHERE action = 'DELETE' AND note ILIKE '%drop;%'",
    );
    assert!(verdict.accepted, "{}", verdict.message);
}

#[test]
fn test_set_returning_in_where_is_rejected_with_guidance() {
    let sql = "SELECT employee_id FROM employees WHERE generate_series(1, 12) > 6";
    let verdict = validate_sql(sql);
    assert!(matches!(
        verdict.rejection,
        Some(RejectionKind::SetReturningInFilter { .. })
    ));
    let feedback = verdict.feedback_for(sql);
    assert!(feedback.contains(sql));
    assert!(!verdict.suggestion.is_empty());
}

#[test]
fn test_unbalanced_parentheses_offer_correction() {
    let verdict = validate_sql("SELECT COUNT(* FROM employees");
    assert!(matches!(
        verdict.rejection,
        Some(RejectionKind::UnbalancedParentheses { open: 1, close: 0 })
    ));
    assert_eq!(
        verdict.corrected_sql.as_deref(),
        Some("SELECT COUNT(* FROM employees)")
    );
}
