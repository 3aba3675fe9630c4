//! Expression parsing and DAG construction.
//!
//! Turns an infix arithmetic expression into an ordered list of binary-op
//! tasks: tokenize, shunting-yard to postfix, then fold the postfix form
//! over an operand stack, emitting one task per operator. Operands that
//! are themselves tasks become `depends_on` edges with a `0.0` placeholder
//! argument and an explicit from-dependency tag.

use crate::config::OperationTimes;
use crate::models::{Operation, Task, TaskStatus};
use chrono::Utc;
use std::collections::HashMap;
use thiserror::Error;

/// Parse failures, reported synchronously on submission.
///
/// No tasks are created when any of these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("invalid character in expression: {0}")]
    InvalidCharacter(String),

    #[error("mismatched parentheses")]
    MismatchedParentheses,

    #[error("insufficient operands")]
    InsufficientOperands,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Op(Operation),
    LeftParen,
    RightParen,
}

/// Stack operand during postfix folding: either a literal value or the ID
/// of the task that will produce the value.
#[derive(Debug, Clone)]
enum Operand {
    Literal(f64),
    Task(String),
}

/// Parse an expression into its task list.
///
/// Task IDs are `"<expression_id>-<ordinal>"` with 1-based ordinals in
/// emission order; the returned list is topologically ordered, every task
/// after all of its dependencies, with the root task last.
pub fn parse_expression(
    text: &str,
    expression_id: &str,
    owner: &str,
    times: &OperationTimes,
) -> Result<Vec<Task>, ParseError> {
    let tokens = tokenize(text)?;
    let postfix = shunting_yard(tokens)?;

    let mut tasks: Vec<Task> = Vec::new();
    let mut stack: Vec<Operand> = Vec::new();

    for token in postfix {
        match token {
            Token::Number(value) => stack.push(Operand::Literal(value)),
            Token::Op(operation) => {
                let (Some(right), Some(left)) = (stack.pop(), stack.pop()) else {
                    return Err(ParseError::InsufficientOperands);
                };

                let task_id = format!("{expression_id}-{}", tasks.len() + 1);
                let mut depends_on = Vec::new();

                // Dependency order matches argument order: arg1 source
                // first, then arg2 source.
                let (arg1, arg1_from_dep) = match left {
                    Operand::Literal(value) => (value, false),
                    Operand::Task(dep_id) => {
                        depends_on.push(dep_id);
                        (0.0, true)
                    }
                };
                let (arg2, arg2_from_dep) = match right {
                    Operand::Literal(value) => (value, false),
                    Operand::Task(dep_id) => {
                        depends_on.push(dep_id);
                        (0.0, true)
                    }
                };

                let now = Utc::now();
                tasks.push(Task {
                    id: task_id.clone(),
                    arg1,
                    arg2,
                    arg1_from_dep,
                    arg2_from_dep,
                    operation,
                    operation_time_ms: times.for_operation(operation),
                    depends_on,
                    result: None,
                    status: TaskStatus::Pending,
                    user_login: owner.to_string(),
                    created_at: now,
                    updated_at: now,
                });
                stack.push(Operand::Task(task_id));
            }
            Token::LeftParen | Token::RightParen => {
                return Err(ParseError::MismatchedParentheses);
            }
        }
    }

    // A lone literal produces no task; leftover operands mean an operator
    // is missing. Both leave nothing for the scheduler to run.
    if tasks.is_empty() || stack.len() != 1 {
        return Err(ParseError::InsufficientOperands);
    }

    Ok(reorder_by_dependencies(tasks))
}

fn tokenize(text: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut literal = String::new();

    for ch in text.chars() {
        match ch {
            '0'..='9' | '.' => literal.push(ch),
            ' ' | '\t' => flush_literal(&mut literal, &mut tokens)?,
            '+' => {
                flush_literal(&mut literal, &mut tokens)?;
                tokens.push(Token::Op(Operation::Add));
            }
            '-' => {
                flush_literal(&mut literal, &mut tokens)?;
                tokens.push(Token::Op(Operation::Sub));
            }
            '*' => {
                flush_literal(&mut literal, &mut tokens)?;
                tokens.push(Token::Op(Operation::Mul));
            }
            '/' => {
                flush_literal(&mut literal, &mut tokens)?;
                tokens.push(Token::Op(Operation::Div));
            }
            '(' => {
                flush_literal(&mut literal, &mut tokens)?;
                tokens.push(Token::LeftParen);
            }
            ')' => {
                flush_literal(&mut literal, &mut tokens)?;
                tokens.push(Token::RightParen);
            }
            other => return Err(ParseError::InvalidCharacter(other.to_string())),
        }
    }
    flush_literal(&mut literal, &mut tokens)?;

    Ok(tokens)
}

fn flush_literal(literal: &mut String, tokens: &mut Vec<Token>) -> Result<(), ParseError> {
    if literal.is_empty() {
        return Ok(());
    }
    let value: f64 = literal
        .parse()
        .map_err(|_| ParseError::InvalidCharacter(literal.clone()))?;
    tokens.push(Token::Number(value));
    literal.clear();
    Ok(())
}

fn precedence(operation: Operation) -> u8 {
    match operation {
        Operation::Add | Operation::Sub => 1,
        Operation::Mul | Operation::Div => 2,
    }
}

/// Shunting-yard conversion to postfix, all operators left-associative.
fn shunting_yard(tokens: Vec<Token>) -> Result<Vec<Token>, ParseError> {
    let mut output = Vec::new();
    let mut operators: Vec<Token> = Vec::new();

    for token in tokens {
        match token {
            Token::Number(_) => output.push(token),
            Token::Op(operation) => {
                while matches!(
                    operators.last(),
                    Some(Token::Op(top)) if precedence(*top) >= precedence(operation)
                ) {
                    if let Some(top) = operators.pop() {
                        output.push(top);
                    }
                }
                operators.push(Token::Op(operation));
            }
            Token::LeftParen => operators.push(token),
            Token::RightParen => loop {
                match operators.pop() {
                    Some(Token::LeftParen) => break,
                    Some(op) => output.push(op),
                    None => return Err(ParseError::MismatchedParentheses),
                }
            },
        }
    }

    while let Some(token) = operators.pop() {
        if token == Token::LeftParen {
            return Err(ParseError::MismatchedParentheses);
        }
        output.push(token);
    }

    Ok(output)
}

/// Reverse-post-order DFS over the `depends_on` edges.
///
/// Postfix folding already emits dependencies before their dependents;
/// this pass pins down the output contract regardless of how the list
/// was produced: every task appears after all tasks it depends on.
fn reorder_by_dependencies(tasks: Vec<Task>) -> Vec<Task> {
    let index: HashMap<String, usize> = tasks
        .iter()
        .enumerate()
        .map(|(position, task)| (task.id.clone(), position))
        .collect();

    let mut visited = vec![false; tasks.len()];
    let mut order = Vec::with_capacity(tasks.len());

    fn visit(
        position: usize,
        tasks: &[Task],
        index: &HashMap<String, usize>,
        visited: &mut [bool],
        order: &mut Vec<usize>,
    ) {
        if visited[position] {
            return;
        }
        visited[position] = true;
        for dep_id in &tasks[position].depends_on {
            if let Some(&dep_position) = index.get(dep_id) {
                visit(dep_position, tasks, index, visited, order);
            }
        }
        order.push(position);
    }

    for position in 0..tasks.len() {
        visit(position, &tasks, &index, &mut visited, &mut order);
    }

    order.into_iter().map(|position| tasks[position].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Operation;
    use std::collections::HashMap;

    fn test_times() -> OperationTimes {
        OperationTimes {
            addition_ms: 10,
            subtraction_ms: 20,
            multiplication_ms: 30,
            division_ms: 40,
        }
    }

    fn parse(text: &str) -> Result<Vec<Task>, ParseError> {
        parse_expression(text, "expr", "alice", &test_times())
    }

    /// Oracle evaluator: walk the task list in order, substituting
    /// dependency results into placeholder arguments.
    fn evaluate_plan(tasks: &[Task]) -> f64 {
        let mut results: HashMap<String, f64> = HashMap::new();
        for task in tasks {
            let mut deps = task.depends_on.iter();
            let arg1 = if task.arg1_from_dep {
                results[deps.next().expect("arg1 tagged as dependency")]
            } else {
                task.arg1
            };
            let arg2 = if task.arg2_from_dep {
                results[deps.next().expect("arg2 tagged as dependency")]
            } else {
                task.arg2
            };
            let value = task.operation.apply(arg1, arg2).expect("oracle inputs are valid");
            results.insert(task.id.clone(), value);
        }
        results[&tasks.last().expect("plan is never empty").id]
    }

    #[test]
    fn test_single_operation() {
        let tasks = parse("2+3").unwrap();
        assert_eq!(tasks.len(), 1);

        let task = &tasks[0];
        assert_eq!(task.id, "expr-1");
        assert_eq!(task.operation, Operation::Add);
        assert_eq!((task.arg1, task.arg2), (2.0, 3.0));
        assert!(!task.arg1_from_dep && !task.arg2_from_dep);
        assert!(task.depends_on.is_empty());
        assert_eq!(task.operation_time_ms, 10);
        assert_eq!(task.user_login, "alice");
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_operator_precedence() {
        // 2+3*4: the multiply is emitted first, the add consumes it as arg2.
        let tasks = parse("2+3*4").unwrap();
        assert_eq!(tasks.len(), 2);

        assert_eq!(tasks[0].operation, Operation::Mul);
        assert_eq!((tasks[0].arg1, tasks[0].arg2), (3.0, 4.0));

        assert_eq!(tasks[1].operation, Operation::Add);
        assert_eq!(tasks[1].arg1, 2.0);
        assert!(!tasks[1].arg1_from_dep);
        assert!(tasks[1].arg2_from_dep);
        assert_eq!(tasks[1].depends_on, vec!["expr-1".to_string()]);

        assert_eq!(evaluate_plan(&tasks), 14.0);
    }

    #[test]
    fn test_parentheses_override_precedence() {
        // (2+3)*4: the add is emitted first, the multiply consumes it as arg1.
        let tasks = parse("(2+3)*4").unwrap();
        assert_eq!(tasks.len(), 2);

        assert_eq!(tasks[0].operation, Operation::Add);
        assert_eq!(tasks[1].operation, Operation::Mul);
        assert!(tasks[1].arg1_from_dep);
        assert!(!tasks[1].arg2_from_dep);
        assert_eq!(tasks[1].arg2, 4.0);
        assert_eq!(tasks[1].depends_on, vec!["expr-1".to_string()]);

        assert_eq!(evaluate_plan(&tasks), 20.0);
    }

    #[test]
    fn test_parallel_subtrees() {
        let tasks = parse("(1+2)*(3+4)").unwrap();
        assert_eq!(tasks.len(), 3);

        let root = &tasks[2];
        assert_eq!(root.operation, Operation::Mul);
        assert!(root.arg1_from_dep && root.arg2_from_dep);
        assert_eq!(root.depends_on, vec!["expr-1".to_string(), "expr-2".to_string()]);

        assert_eq!(evaluate_plan(&tasks), 21.0);
    }

    #[test]
    fn test_topological_positions() {
        for text in ["2+3*4", "(2+3)*4", "(1+2)*(3+4)", "1+2+3+4", "100/(2+3)-7*2"] {
            let tasks = parse(text).unwrap();
            let positions: HashMap<&str, usize> = tasks
                .iter()
                .enumerate()
                .map(|(position, task)| (task.id.as_str(), position))
                .collect();

            for (position, task) in tasks.iter().enumerate() {
                for dep_id in &task.depends_on {
                    assert!(
                        positions[dep_id.as_str()] < position,
                        "{text}: dependency {dep_id} not before {}",
                        task.id
                    );
                }
            }
        }
    }

    #[test]
    fn test_single_root() {
        for text in ["2+3", "(1+2)*(3+4)", "1+2*3-4/5"] {
            let tasks = parse(text).unwrap();
            let referenced: Vec<&String> =
                tasks.iter().flat_map(|task| task.depends_on.iter()).collect();
            let roots: Vec<&Task> = tasks
                .iter()
                .filter(|task| !referenced.contains(&&task.id))
                .collect();
            assert_eq!(roots.len(), 1, "{text}");
            assert_eq!(roots[0].id, tasks.last().unwrap().id, "{text}");
        }
    }

    #[test]
    fn test_evaluation_matches_direct_arithmetic() {
        let cases = [
            ("2+3", 5.0),
            ("2+3*4", 14.0),
            ("(2+3)*4", 20.0),
            ("(1+2)*(3+4)", 21.0),
            ("10-2/4", 9.5),
            ("1.5*2+0.25", 3.25),
            ("100/(2+3)-7", 13.0),
            ("8/2/2", 2.0),
            ("7-3-2", 2.0),
        ];
        for (text, expected) in cases {
            let tasks = parse(text).unwrap();
            let actual = evaluate_plan(&tasks);
            assert!(
                (actual - expected).abs() <= 1e-9 * expected.abs().max(1.0),
                "{text}: got {actual}, want {expected}"
            );
        }
    }

    #[test]
    fn test_whitespace_is_insignificant() {
        let compact = parse("(1+2)*3").unwrap();
        let spaced = parse(" ( 1 + 2 ) * 3 ").unwrap();
        assert_eq!(compact.len(), spaced.len());
        assert_eq!(evaluate_plan(&spaced), 9.0);
    }

    #[test]
    fn test_rejects_invalid_character() {
        assert_eq!(
            parse("2+a"),
            Err(ParseError::InvalidCharacter("a".to_string()))
        );
        assert_eq!(
            parse("1.2.3+1"),
            Err(ParseError::InvalidCharacter("1.2.3".to_string()))
        );
    }

    #[test]
    fn test_rejects_mismatched_parentheses() {
        assert_eq!(parse("(1+2"), Err(ParseError::MismatchedParentheses));
        assert_eq!(parse("1+2)"), Err(ParseError::MismatchedParentheses));
        assert_eq!(parse("((1+2)*3"), Err(ParseError::MismatchedParentheses));
    }

    #[test]
    fn test_rejects_insufficient_operands() {
        assert_eq!(parse(""), Err(ParseError::InsufficientOperands));
        assert_eq!(parse("2++3"), Err(ParseError::InsufficientOperands));
        assert_eq!(parse("2+"), Err(ParseError::InsufficientOperands));
        // A lone literal yields no binary operation to schedule.
        assert_eq!(parse("5"), Err(ParseError::InsufficientOperands));
        // Unary minus is not supported.
        assert_eq!(parse("-5+2"), Err(ParseError::InsufficientOperands));
    }
}
