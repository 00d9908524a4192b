// src/runtime/actions.rs
//! Closed table of page actions a job may request
//!
//! Clients name actions as strings with keyword arguments. Each supported name
//! maps to a parser producing a typed [`PageAction`]; anything else is an
//! `UnknownAction`, which the runtime skips or fails depending on
//! `renderer.strict_actions`.

use crate::model::{JobAction, LoadStrategy};
use crate::utils::errors::{FleetError, Result};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum PageAction {
    /// `wait_for_timeout(timeout=<ms>)`
    WaitForTimeout { timeout: Duration },
    /// `reload()`
    Reload,
    /// `goto(url=...)`
    Goto { url: String },
    /// `wait_for_load_state(state=...)`, defaults to `load`
    WaitForLoadState { state: LoadStrategy },
    /// `click(selector=...)`
    Click { selector: String },
    /// `fill(selector=..., value=...)`
    Fill { selector: String, value: String },
    /// `press(selector=..., key=...)`
    Press { selector: String, key: String },
    /// `evaluate(expression=...)`
    Evaluate { expression: String },
}

type ActionParser = fn(&JobAction) -> Result<PageAction>;

const ACTION_TABLE: &[(&str, ActionParser)] = &[
    ("wait_for_timeout", parse_wait_for_timeout),
    ("reload", parse_reload),
    ("goto", parse_goto),
    ("wait_for_load_state", parse_wait_for_load_state),
    ("click", parse_click),
    ("fill", parse_fill),
    ("press", parse_press),
    ("evaluate", parse_evaluate),
];

impl PageAction {
    /// Resolve a client action through the action table
    pub fn from_job_action(action: &JobAction) -> Result<Self> {
        let (_, parse) = ACTION_TABLE
            .iter()
            .find(|(name, _)| *name == action.name)
            .ok_or_else(|| FleetError::UnknownAction(action.name.clone()))?;
        parse(action)
    }

    pub fn name(&self) -> &'static str {
        match self {
            PageAction::WaitForTimeout { .. } => "wait_for_timeout",
            PageAction::Reload => "reload",
            PageAction::Goto { .. } => "goto",
            PageAction::WaitForLoadState { .. } => "wait_for_load_state",
            PageAction::Click { .. } => "click",
            PageAction::Fill { .. } => "fill",
            PageAction::Press { .. } => "press",
            PageAction::Evaluate { .. } => "evaluate",
        }
    }

    /// Names accepted by [`PageAction::from_job_action`]
    pub fn supported() -> impl Iterator<Item = &'static str> {
        ACTION_TABLE.iter().map(|(name, _)| *name)
    }
}

fn invalid(action: &JobAction, reason: impl Into<String>) -> FleetError {
    FleetError::InvalidAction {
        action: action.name.clone(),
        reason: reason.into(),
    }
}

fn required_str(action: &JobAction, key: &str) -> Result<String> {
    action
        .arg(key)
        .ok_or_else(|| invalid(action, format!("missing argument '{}'", key)))?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(action, format!("'{}' must be a string", key)))
}

fn parse_wait_for_timeout(action: &JobAction) -> Result<PageAction> {
    let millis = action
        .arg("timeout")
        .ok_or_else(|| invalid(action, "missing argument 'timeout'"))?
        .as_f64()
        .ok_or_else(|| invalid(action, "'timeout' must be a number"))?;
    if !millis.is_finite() || millis < 0.0 {
        return Err(invalid(action, "'timeout' must be a non-negative number"));
    }
    Ok(PageAction::WaitForTimeout {
        timeout: Duration::from_micros((millis * 1000.0).round() as u64),
    })
}

fn parse_reload(_: &JobAction) -> Result<PageAction> {
    Ok(PageAction::Reload)
}

fn parse_goto(action: &JobAction) -> Result<PageAction> {
    Ok(PageAction::Goto {
        url: required_str(action, "url")?,
    })
}

fn parse_click(action: &JobAction) -> Result<PageAction> {
    Ok(PageAction::Click {
        selector: required_str(action, "selector")?,
    })
}

fn parse_fill(action: &JobAction) -> Result<PageAction> {
    Ok(PageAction::Fill {
        selector: required_str(action, "selector")?,
        value: required_str(action, "value")?,
    })
}

fn parse_press(action: &JobAction) -> Result<PageAction> {
    Ok(PageAction::Press {
        selector: required_str(action, "selector")?,
        key: required_str(action, "key")?,
    })
}

fn parse_evaluate(action: &JobAction) -> Result<PageAction> {
    Ok(PageAction::Evaluate {
        expression: required_str(action, "expression")?,
    })
}

fn parse_wait_for_load_state(action: &JobAction) -> Result<PageAction> {
    let state = match action.arg("state") {
        None => LoadStrategy::Load,
        Some(value) => value
            .as_str()
            .ok_or_else(|| invalid(action, "'state' must be a string"))?
            .parse()
            .map_err(|e: String| invalid(action, e))?,
    };
    Ok(PageAction::WaitForLoadState { state })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArgValue;

    #[test]
    fn test_parse_wait_for_timeout() {
        let action = JobAction::new("wait_for_timeout").with_arg("timeout", ArgValue::Int(250));
        assert_eq!(
            PageAction::from_job_action(&action).unwrap(),
            PageAction::WaitForTimeout { timeout: Duration::from_millis(250) }
        );

        let action = JobAction::new("wait_for_timeout").with_arg("timeout", ArgValue::Double(1.5));
        assert_eq!(
            PageAction::from_job_action(&action).unwrap(),
            PageAction::WaitForTimeout { timeout: Duration::from_micros(1500) }
        );
    }

    #[test]
    fn test_unknown_action() {
        let err = PageAction::from_job_action(&JobAction::new("mine_bitcoin")).unwrap_err();
        assert!(matches!(err, FleetError::UnknownAction(name) if name == "mine_bitcoin"));
    }

    #[test]
    fn test_missing_and_mistyped_arguments() {
        let err = PageAction::from_job_action(&JobAction::new("click")).unwrap_err();
        assert!(matches!(err, FleetError::InvalidAction { .. }));

        let action = JobAction::new("fill")
            .with_arg("selector", ArgValue::Str("#q".into()))
            .with_arg("value", ArgValue::Int(3));
        assert!(matches!(
            PageAction::from_job_action(&action),
            Err(FleetError::InvalidAction { .. })
        ));

        let action = JobAction::new("wait_for_timeout").with_arg("timeout", ArgValue::Int(-5));
        assert!(PageAction::from_job_action(&action).is_err());
    }

    #[test]
    fn test_wait_for_load_state_default() {
        assert_eq!(
            PageAction::from_job_action(&JobAction::new("wait_for_load_state")).unwrap(),
            PageAction::WaitForLoadState { state: LoadStrategy::Load }
        );

        let action = JobAction::new("wait_for_load_state")
            .with_arg("state", ArgValue::Str("NetworkIdle".into()));
        assert_eq!(
            PageAction::from_job_action(&action).unwrap(),
            PageAction::WaitForLoadState { state: LoadStrategy::NetworkIdle }
        );

        let action = JobAction::new("wait_for_load_state").with_arg("state", ArgValue::Bool(true));
        assert!(matches!(
            PageAction::from_job_action(&action),
            Err(FleetError::InvalidAction { .. })
        ));
    }

    #[test]
    fn test_table_names_match_variants() {
        for name in PageAction::supported() {
            let mut action = JobAction::new(name);
            for key in ["timeout", "url", "selector", "value", "key", "expression"] {
                let value = if key == "timeout" {
                    ArgValue::Int(1)
                } else {
                    ArgValue::Str("x".into())
                };
                action = action.with_arg(key, value);
            }
            assert_eq!(PageAction::from_job_action(&action).unwrap().name(), name);
        }
    }
}
