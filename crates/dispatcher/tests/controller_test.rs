use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use periodic_core::{MessageBus, MonotonicClock, SchedulerMessage, StatusQuery};
use periodic_dispatcher::{ControllerOptions, SchedulerController, SchedulerMetrics};
use periodic_domain::{ExecutionTrigger, NoJitter};
use periodic_testing_utils::{registry_with, t0, RecordingTrigger, TestEnv};

fn start(trigger: &RecordingTrigger) -> SchedulerController {
    let options = ControllerOptions {
        clock: Arc::new(MonotonicClock::starting_at(t0())),
        jitter: Box::new(NoJitter),
        status_timeout: Duration::from_secs(1),
        metrics: Arc::new(SchedulerMetrics::new()),
    };
    let trigger = trigger.clone();
    SchedulerController::start(options, move |_bus| {
        Arc::new(trigger) as Arc<dyn ExecutionTrigger>
    })
}

async fn next_run_of(
    controller: &SchedulerController,
    id: u32,
) -> Option<chrono::DateTime<chrono::Utc>> {
    controller
        .get_status()
        .await
        .unwrap()
        .worker(id)
        .and_then(|entry| entry.next_run_at)
}

#[tokio::test(start_paused = true)]
async fn test_invalid_worker_is_reported_while_valid_worker_fires() {
    let trigger = RecordingTrigger::new();
    let controller = &start(&trigger);

    let registry = registry_with(&["5", "not-a-schedule"]);
    assert_eq!(controller.register_all(&registry).await, 1);

    let first = t0() + ChronoDuration::seconds(5);
    assert!(
        TestEnv::wait_for(
            || async move { next_run_of(controller, 1).await == Some(first) },
            Duration::from_secs(1),
        )
        .await
    );

    let status = controller.get_status().await.unwrap();
    assert_eq!(status.periodic_tasks_count, 2);
    let invalid = status.worker(2).unwrap();
    assert_eq!(invalid.next_run_at, None);
    assert_eq!(invalid.schedule, "not-a-schedule");
    assert_eq!(invalid.status_label(), "ERROR");
    assert_eq!(status.worker(1).unwrap().status_label(), "OK");

    tokio::time::sleep(Duration::from_millis(5_500)).await;
    assert_eq!(trigger.spawned(), vec![1]);

    let second = t0() + ChronoDuration::seconds(10);
    assert!(
        TestEnv::wait_for(
            || async move { next_run_of(controller, 1).await == Some(second) },
            Duration::from_secs(1),
        )
        .await
    );

    controller.stop().await.unwrap();
    controller.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_child_messages_reach_the_status_view() {
    let trigger = RecordingTrigger::new();
    let controller = start(&trigger);
    controller.register_all(&registry_with(&["60"])).await;

    // 子进程的事件经由同一条总线转发
    let bus = controller.message_bus();
    bus.publish(SchedulerMessage::process_started(1)).unwrap();
    bus.publish(SchedulerMessage::process_scheduled(99, t0())).unwrap();
    TestEnv::settle().await;

    let status = controller.get_status().await.unwrap();
    assert_eq!(status.periodic_tasks_count, 1);
    assert!(status.worker(99).is_none());
    assert_eq!(
        status.worker(1).unwrap().next_run_at,
        Some(t0() + ChronoDuration::seconds(60))
    );
}

#[tokio::test(start_paused = true)]
async fn test_status_names_default_from_id() {
    let trigger = RecordingTrigger::new();
    let controller = start(&trigger);
    controller
        .register_all(&registry_with(&["1 minute", "0 0 * * *"]))
        .await;

    let status = controller.get_status().await.unwrap();
    let names: Vec<&str> = status
        .periodic_workers
        .iter()
        .map(|entry| entry.name.as_str())
        .collect();
    assert_eq!(names, vec!["periodic_worker_1", "periodic_worker_2"]);
    assert_eq!(status.worker(1).unwrap().identity.to_string(), "app:app");
}
