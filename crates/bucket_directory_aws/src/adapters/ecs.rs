use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_ecs::types::{
    AssignPublicIp, AwsVpcConfiguration, ContainerOverride, LaunchType, NetworkConfiguration,
    Task, TaskOverride,
};
use bucket_directory_core::executor::{StoppedTask, TaskLaunch, TaskRunner};

const STOPPED: &str = "STOPPED";

/// Runs Fargate tasks and polls them until they stop.
#[derive(Clone)]
pub struct AwsEcsTaskRunner {
    ecs_client: aws_sdk_ecs::Client,
    poll_interval: Duration,
}

impl AwsEcsTaskRunner {
    pub fn new(ecs_client: aws_sdk_ecs::Client, poll_interval: Duration) -> Self {
        Self {
            ecs_client,
            poll_interval,
        }
    }
}

#[async_trait]
impl TaskRunner for AwsEcsTaskRunner {
    async fn run_task(&self, launch: &TaskLaunch) -> Result<Vec<String>, String> {
        let vpc = AwsVpcConfiguration::builder()
            .set_subnets(Some(launch.subnets.clone()))
            .set_security_groups(Some(launch.security_groups.clone()))
            .assign_public_ip(if launch.assign_public_ip {
                AssignPublicIp::Enabled
            } else {
                AssignPublicIp::Disabled
            })
            .build()
            .map_err(|error| format!("invalid task network configuration: {error}"))?;
        let overrides = TaskOverride::builder()
            .container_overrides(
                ContainerOverride::builder()
                    .name(&launch.container_name)
                    .set_command(Some(launch.command.clone()))
                    .build(),
            )
            .build();

        let output = self
            .ecs_client
            .run_task()
            .cluster(&launch.cluster)
            .task_definition(&launch.task_definition)
            .launch_type(LaunchType::Fargate)
            .count(1)
            .network_configuration(
                NetworkConfiguration::builder()
                    .awsvpc_configuration(vpc)
                    .build(),
            )
            .overrides(overrides)
            .send()
            .await
            .map_err(|error| format!("failed to run ecs task: {error}"))?;

        if let Some(failure) = output.failures().first() {
            return Err(format!(
                "ecs rejected task: {}",
                failure.reason().unwrap_or("no reason given")
            ));
        }
        Ok(output
            .tasks()
            .iter()
            .filter_map(|task| task.task_arn().map(str::to_string))
            .collect())
    }

    async fn wait_until_stopped(
        &self,
        cluster: &str,
        task_arns: &[String],
    ) -> Result<Vec<StoppedTask>, String> {
        loop {
            let output = self
                .ecs_client
                .describe_tasks()
                .cluster(cluster)
                .set_tasks(Some(task_arns.to_vec()))
                .send()
                .await
                .map_err(|error| format!("failed to describe ecs tasks: {error}"))?;

            if let Some(failure) = output.failures().first() {
                return Err(format!(
                    "ecs could not describe task '{}': {}",
                    failure.arn().unwrap_or_default(),
                    failure.reason().unwrap_or("no reason given")
                ));
            }

            if let Some(stopped) = all_stopped(output.tasks(), task_arns.len()) {
                return Ok(stopped);
            }

            tracing::debug!(
                cluster,
                pending = task_arns.len(),
                "waiting for sync task to stop"
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn stop_tasks(
        &self,
        cluster: &str,
        task_arns: &[String],
        reason: &str,
    ) -> Result<(), String> {
        let mut failures = Vec::new();
        for task_arn in task_arns {
            let stopped = self
                .ecs_client
                .stop_task()
                .cluster(cluster)
                .task(task_arn)
                .reason(reason)
                .send()
                .await;
            match stopped {
                Ok(_) => tracing::info!(cluster, task_arn = %task_arn, "stopped sync task"),
                Err(error) => failures.push(format!("{task_arn}: {error}")),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(format!("failed to stop ecs tasks: {}", failures.join("; ")))
        }
    }
}

/// `Some` once all `expected` tasks are described and STOPPED.
fn all_stopped(tasks: &[Task], expected: usize) -> Option<Vec<StoppedTask>> {
    let done = tasks.len() == expected
        && tasks.iter().all(|task| task.last_status() == Some(STOPPED));
    done.then(|| tasks.iter().map(stopped_task).collect())
}

/// A task succeeded only if every container reported exit code 0.
fn stopped_task(task: &Task) -> StoppedTask {
    let exit_codes: Vec<Option<i32>> = task
        .containers()
        .iter()
        .map(|container| container.exit_code())
        .collect();
    let exit_code = match exit_codes.iter().find(|code| **code != Some(0)) {
        Some(failing) => *failing,
        None if exit_codes.is_empty() => None,
        None => Some(0),
    };

    StoppedTask {
        task_arn: task.task_arn().unwrap_or_default().to_string(),
        exit_code,
        stopped_reason: task.stopped_reason().map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use aws_sdk_ecs::types::Container;

    use super::*;

    fn container(exit_code: Option<i32>) -> Container {
        Container::builder()
            .name("container")
            .set_exit_code(exit_code)
            .build()
    }

    fn task(status: &str, containers: Vec<Container>) -> Task {
        Task::builder()
            .task_arn("arn:aws:ecs:us-west-2:123456789012:task/sync/1")
            .last_status(status)
            .stopped_reason("Essential container in task exited")
            .set_containers(Some(containers))
            .build()
    }

    #[test]
    fn all_zero_exit_codes_succeed() {
        let stopped = stopped_task(&task(STOPPED, vec![container(Some(0)), container(Some(0))]));

        assert!(stopped.succeeded());
        assert_eq!(stopped.task_arn, "arn:aws:ecs:us-west-2:123456789012:task/sync/1");
    }

    #[test]
    fn one_failing_container_fails_the_task() {
        let stopped = stopped_task(&task(STOPPED, vec![container(Some(0)), container(Some(1))]));

        assert!(!stopped.succeeded());
        assert_eq!(stopped.exit_code, Some(1));
        assert_eq!(
            stopped.stopped_reason.as_deref(),
            Some("Essential container in task exited")
        );
    }

    #[test]
    fn task_without_containers_fails() {
        let stopped = stopped_task(&task(STOPPED, Vec::new()));

        assert!(!stopped.succeeded());
        assert_eq!(stopped.exit_code, None);
    }

    #[test]
    fn missing_exit_code_fails() {
        let stopped = stopped_task(&task(STOPPED, vec![container(Some(0)), container(None)]));

        assert!(!stopped.succeeded());
        assert_eq!(stopped.exit_code, None);
    }

    #[test]
    fn waits_while_any_task_is_running() {
        let tasks = vec![
            task(STOPPED, vec![container(Some(0))]),
            task("RUNNING", vec![container(None)]),
        ];

        assert_eq!(all_stopped(&tasks, 2), None);
    }

    #[test]
    fn waits_until_every_task_is_described() {
        let tasks = vec![task(STOPPED, vec![container(Some(0))])];

        assert_eq!(all_stopped(&tasks, 2), None);
    }

    #[test]
    fn reports_each_stopped_task() {
        let tasks = vec![
            task(STOPPED, vec![container(Some(0))]),
            task(STOPPED, vec![container(Some(137))]),
        ];

        let stopped = all_stopped(&tasks, 2).expect("all stopped");

        assert_eq!(
            stopped.iter().map(|task| task.exit_code).collect::<Vec<_>>(),
            vec![Some(0), Some(137)]
        );
    }
}
