//! Default scheduling policy for tree task nodes.
//!
//! CREATED runs the orchestrator (when one is configured) to populate
//! sub-tasks, then starts execution. RUNNING schedules every sub-task in
//! order first; a canceled sub-task sends the parent back to CREATED for a
//! re-plan, otherwise the executor agent runs and the revisit bound
//! decides between retry and cancellation. The RUNNING->CREATED side
//! effect propagates cancellation down the subtree, records what was lost,
//! and resets the parent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info};

use crate::agent::Agent;
use crate::error::EngineResult;
use crate::machine::{Event, State};
use crate::task::states::{TaskEvent, TaskState};
use crate::task::tree::TreeTask;
use crate::types::message::Message;

use super::{OnStateChangedFn, OnStateFn, Scheduler};

/// Build the per-state event producers for tree tasks.
///
/// `executor` runs the task itself; `orchestrator`, when given, populates
/// sub-tasks while the task is in CREATED.
pub fn tree_on_state_fn<XSt, XEv, OSt, OEv>(
    executor: Arc<Agent<XSt, XEv, TaskState, TaskEvent>>,
    orchestrator: Option<Arc<Agent<OSt, OEv, TaskState, TaskEvent>>>,
) -> HashMap<TaskState, OnStateFn<TaskState, TaskEvent>>
where
    XSt: State,
    XEv: Event,
    OSt: State,
    OEv: Event,
{
    let mut on_state_fn: HashMap<TaskState, OnStateFn<TaskState, TaskEvent>> = HashMap::new();

    let created: OnStateFn<TaskState, TaskEvent> = {
        let orchestrator = orchestrator.clone();
        Arc::new(move |_scheduler, context, queue, task| {
            let orchestrator = orchestrator.clone();
            async move {
                if let Some(orchestrator) = orchestrator {
                    orchestrator.run_task_stream(context, queue, task).await?;
                }
                Ok(TaskEvent::Planed)
            }
            .boxed()
        })
    };
    on_state_fn.insert(TaskState::Created, created);

    let running: OnStateFn<TaskState, TaskEvent> = {
        let executor = executor.clone();
        Arc::new(move |scheduler, context, queue, task| {
            let executor = executor.clone();
            async move {
                // sub-tasks run to completion before the task itself
                let sub_tasks = { task.lock().await.sub_tasks() };
                for sub_task in &sub_tasks {
                    scheduler
                        .clone()
                        .schedule(context.clone(), queue.clone(), sub_task.clone())
                        .await?;
                }

                for sub_task in &sub_tasks {
                    if sub_task.lock().await.current_state() == TaskState::Canceled {
                        // a lost sub-task invalidates the plan
                        return Ok(TaskEvent::Init);
                    }
                }

                executor.run_task_stream(context, queue, task.clone()).await?;

                let (errored, running_visits) = {
                    let guard = task.lock().await;
                    (guard.is_error(), guard.visit_count(TaskState::Running))
                };
                if errored {
                    // the entry visit is free; only revisits count against
                    // the bound, so RUNNING may be entered bound + 1 times
                    if running_visits as i64 > scheduler.max_revisit_count() as i64 {
                        Ok(TaskEvent::Cancel)
                    } else {
                        Ok(TaskEvent::Planed)
                    }
                } else {
                    Ok(TaskEvent::Done)
                }
            }
            .boxed()
        })
    };
    on_state_fn.insert(TaskState::Running, running);

    on_state_fn
}

/// Build the per-transition side effects for tree tasks.
pub fn tree_on_state_changed_fn(
) -> HashMap<(TaskState, TaskState), OnStateChangedFn<TaskState, TaskEvent>> {
    let mut on_state_changed_fn: HashMap<
        (TaskState, TaskState),
        OnStateChangedFn<TaskState, TaskEvent>,
    > = HashMap::new();

    on_state_changed_fn.insert(
        (TaskState::Created, TaskState::Running),
        Arc::new(|_scheduler, _context, _queue, task| {
            async move {
                let guard = task.lock().await;
                info!(task = %guard.id(), title = %guard.title(), "created -> running");
                Ok(())
            }
            .boxed()
        }),
    );

    on_state_changed_fn.insert(
        (TaskState::Running, TaskState::Finished),
        Arc::new(|_scheduler, _context, _queue, task| {
            async move {
                let guard = task.lock().await;
                info!(task = %guard.id(), title = %guard.title(), "running -> finished");
                Ok(())
            }
            .boxed()
        }),
    );

    // retry pass: surface the error to the caller and the task context,
    // then clear it for the next attempt
    on_state_changed_fn.insert(
        (TaskState::Running, TaskState::Running),
        Arc::new(|_scheduler, _context, queue, task| {
            async move {
                let (task_id, error_info) = {
                    let guard = task.lock().await;
                    (
                        guard.id().to_string(),
                        guard.error_info().unwrap_or_default().to_string(),
                    )
                };
                error!(task = %task_id, error = %error_info, "execution failed, retrying");

                let error_message = Message::system(
                    "the previous execution pass failed with the following error:",
                )
                .with_text(error_info.as_str())
                .build();
                queue.put(error_message.clone()).await?;
                {
                    let mut guard = task.lock().await;
                    guard.append_context(error_message)?;
                    guard.clean_error_info();
                }
                Ok(())
            }
            .boxed()
        }),
    );

    // re-plan: record and detach canceled sub-tasks, cancel the rest of
    // the unfinished subtree, then reset the parent
    on_state_changed_fn.insert(
        (TaskState::Running, TaskState::Created),
        Arc::new(|_scheduler, _context, _queue, task| {
            async move {
                let sub_tasks = { task.lock().await.sub_tasks() };

                for sub_task in &sub_tasks {
                    let summary = {
                        let guard = sub_task.lock().await;
                        if guard.current_state() == TaskState::Canceled {
                            Some(format!(
                                "sub-task `{}` was canceled: {}",
                                guard.title(),
                                guard.error_info().unwrap_or("no error recorded"),
                            ))
                        } else {
                            None
                        }
                    };
                    if let Some(summary) = summary {
                        task.lock()
                            .await
                            .append_context(Message::system(summary).build())?;
                    }
                }

                for sub_task in &sub_tasks {
                    let state = { sub_task.lock().await.current_state() };
                    if state != TaskState::Finished && state != TaskState::Canceled {
                        sub_task.lock().await.handle_event(TaskEvent::Cancel).await?;
                    }
                }

                // canceled sub-tasks are detached so the re-plan starts
                // from the surviving finished work
                for sub_task in &sub_tasks {
                    let canceled =
                        { sub_task.lock().await.current_state() == TaskState::Canceled };
                    if canceled {
                        TreeTask::pop_sub_task(&task, sub_task).await;
                    }
                }

                let mut guard = task.lock().await;
                info!(task = %guard.id(), "sub-task canceled, resetting for re-plan");
                guard.reset();
                guard.clean_error_info();
                Ok(())
            }
            .boxed()
        }),
    );

    on_state_changed_fn.insert(
        (TaskState::Running, TaskState::Canceled),
        Arc::new(|_scheduler, _context, _queue, task| {
            async move {
                let guard = task.lock().await;
                info!(task = %guard.id(), title = %guard.title(), "running -> canceled");
                Ok(())
            }
            .boxed()
        }),
    );

    on_state_changed_fn
}

/// Build the default tree-task scheduler: end states FINISHED and
/// CANCELED, the tree policy above, and `max_error_retry` as the revisit
/// bound.
pub fn build_base_scheduler<XSt, XEv, OSt, OEv>(
    executor: Arc<Agent<XSt, XEv, TaskState, TaskEvent>>,
    orchestrator: Option<Arc<Agent<OSt, OEv, TaskState, TaskEvent>>>,
    max_error_retry: i32,
) -> EngineResult<Arc<Scheduler<TaskState, TaskEvent>>>
where
    XSt: State,
    XEv: Event,
    OSt: State,
    OEv: Event,
{
    let end_states: HashSet<TaskState> = [TaskState::Finished, TaskState::Canceled]
        .into_iter()
        .collect();
    Scheduler::compiled(
        end_states,
        tree_on_state_fn(executor, orchestrator),
        tree_on_state_changed_fn(),
        max_error_retry,
    )
}
