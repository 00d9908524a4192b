// src/grpc/convert.rs
//! Conversions between the domain model and the wire types

use crate::grpc::proto;
use crate::model::{
    ActionArgument, ArgValue, CookieRecord, HealthStatus, Job, JobAction, LoadStrategy,
    RenderResult,
};
use crate::utils::errors::FleetError;

impl From<proto::HealthCheckStatus> for HealthStatus {
    fn from(status: proto::HealthCheckStatus) -> Self {
        match status {
            proto::HealthCheckStatus::Ok => HealthStatus::Healthy,
            proto::HealthCheckStatus::NotOk => HealthStatus::Unhealthy,
            proto::HealthCheckStatus::Unknown => HealthStatus::Unknown,
        }
    }
}

impl From<HealthStatus> for proto::HealthCheckStatus {
    fn from(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Healthy => proto::HealthCheckStatus::Ok,
            HealthStatus::Unhealthy => proto::HealthCheckStatus::NotOk,
            HealthStatus::Unknown => proto::HealthCheckStatus::Unknown,
        }
    }
}

impl From<ArgValue> for proto::action_argument::Value {
    fn from(value: ArgValue) -> Self {
        use proto::action_argument::Value;
        match value {
            ArgValue::Bool(b) => Value::BoolValue(b),
            ArgValue::Int(i) => Value::IntValue(i),
            ArgValue::Double(d) => Value::DoubleValue(d),
            ArgValue::Str(s) => Value::StringValue(s),
        }
    }
}

impl From<proto::action_argument::Value> for ArgValue {
    fn from(value: proto::action_argument::Value) -> Self {
        use proto::action_argument::Value;
        match value {
            Value::BoolValue(b) => ArgValue::Bool(b),
            Value::IntValue(i) => ArgValue::Int(i),
            Value::DoubleValue(d) => ArgValue::Double(d),
            Value::StringValue(s) => ArgValue::Str(s),
        }
    }
}

impl From<JobAction> for proto::Action {
    fn from(action: JobAction) -> Self {
        Self {
            name: action.name,
            args: action
                .args
                .into_iter()
                .map(|a| proto::ActionArgument {
                    name: a.name,
                    value: Some(a.value.into()),
                })
                .collect(),
        }
    }
}

impl TryFrom<proto::Action> for JobAction {
    type Error = FleetError;

    fn try_from(action: proto::Action) -> Result<Self, Self::Error> {
        let mut args = Vec::with_capacity(action.args.len());
        for arg in action.args {
            let value = arg.value.ok_or_else(|| FleetError::InvalidAction {
                action: action.name.clone(),
                reason: format!("argument '{}' has no value", arg.name),
            })?;
            args.push(ActionArgument {
                name: arg.name,
                value: value.into(),
            });
        }
        Ok(Self {
            name: action.name,
            args,
        })
    }
}

impl From<Job> for proto::RenderRequest {
    fn from(job: Job) -> Self {
        Self {
            url: job.url,
            proxy: job.proxy.unwrap_or_default(),
            timeout_ms: job.timeout_ms,
            load: job.load.map(|l| l.as_str().to_string()).unwrap_or_default(),
            actions: job.actions.into_iter().map(Into::into).collect(),
            headers: job.headers,
            block: job.block,
        }
    }
}

impl TryFrom<proto::RenderRequest> for Job {
    type Error = FleetError;

    fn try_from(request: proto::RenderRequest) -> Result<Self, Self::Error> {
        let load = if request.load.is_empty() {
            None
        } else {
            Some(request.load.parse::<LoadStrategy>().map_err(FleetError::Render)?)
        };

        Ok(Self {
            url: request.url,
            proxy: Some(request.proxy).filter(|p| !p.is_empty()),
            timeout_ms: request.timeout_ms.filter(|t| *t > 0),
            load,
            actions: request
                .actions
                .into_iter()
                .map(JobAction::try_from)
                .collect::<Result<_, _>>()?,
            headers: request.headers,
            block: request.block,
        })
    }
}

impl From<CookieRecord> for proto::Cookie {
    fn from(c: CookieRecord) -> Self {
        Self {
            name: c.name,
            value: c.value,
            domain: c.domain,
            path: c.path,
            expires: c.expires,
            http_only: c.http_only,
            secure: c.secure,
            same_site: c.same_site,
        }
    }
}

impl From<proto::Cookie> for CookieRecord {
    fn from(c: proto::Cookie) -> Self {
        Self {
            name: c.name,
            value: c.value,
            domain: c.domain,
            path: c.path,
            expires: c.expires,
            http_only: c.http_only,
            secure: c.secure,
            same_site: c.same_site,
        }
    }
}

impl From<RenderResult> for proto::RenderResponse {
    fn from(result: RenderResult) -> Self {
        Self {
            status: result.status,
            content: result.content,
            error: result.error,
            headers: result.headers,
            cookies: result.cookies.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<proto::RenderResponse> for RenderResult {
    fn from(response: proto::RenderResponse) -> Self {
        Self {
            status: response.status,
            content: response.content,
            error: response.error,
            headers: response.headers,
            cookies: response.cookies.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_wire_fields_become_none() {
        let job = Job::try_from(proto::RenderRequest {
            url: "https://example.com".into(),
            timeout_ms: Some(0),
            ..Default::default()
        })
        .unwrap();

        assert!(job.proxy.is_none());
        assert!(job.timeout_ms.is_none());
        assert!(job.load.is_none());
    }

    #[test]
    fn test_unknown_load_strategy_is_a_render_error() {
        let err = Job::try_from(proto::RenderRequest {
            url: "https://example.com".into(),
            load: "eventually".into(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, FleetError::Render(_)));
    }

    #[test]
    fn test_action_argument_without_value_is_rejected() {
        let err = JobAction::try_from(proto::Action {
            name: "click".into(),
            args: vec![proto::ActionArgument {
                name: "selector".into(),
                value: None,
            }],
        })
        .unwrap_err();
        assert!(matches!(err, FleetError::InvalidAction { .. }));
    }

    #[test]
    fn test_job_survives_the_wire() {
        let mut job = Job::new("https://example.com/a");
        job.proxy = Some("u:p@proxy:3128".into());
        job.load = Some(LoadStrategy::Load);
        job.actions = vec![JobAction::new("wait_for_timeout").with_arg("timeout", ArgValue::Double(1.5))];
        job.block = vec![".css".into()];

        let back = Job::try_from(proto::RenderRequest::from(job.clone())).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn test_health_status_mapping() {
        assert_eq!(HealthStatus::from(proto::HealthCheckStatus::Ok), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from(proto::HealthCheckStatus::NotOk), HealthStatus::Unhealthy);
        assert_eq!(proto::HealthCheckStatus::from(HealthStatus::Unknown), proto::HealthCheckStatus::Unknown);
    }
}
