// tests/queue_properties.rs

use std::collections::VecDeque;

use proptest::prelude::*;

use suitelink::queue::{ComQueue, QueueState};
use suitelink::task::{Task, TaskRef, TaskStatus};

#[derive(Debug, Clone)]
enum Op {
    Add,
    Dispatch,
    Complete,
    Suspend,
    Start,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Add),
        3 => Just(Op::Dispatch),
        3 => Just(Op::Complete),
        1 => Just(Op::Suspend),
        1 => Just(Op::Start),
    ]
}

proptest! {
    #[test]
    fn at_most_one_in_flight_and_dispatch_is_fifo(ops in proptest::collection::vec(op_strategy(), 1..80)) {
        let mut queue = ComQueue::new();
        queue.start();

        let mut expected: VecDeque<u64> = VecDeque::new();
        let mut in_flight: Option<TaskRef> = None;
        let mut next = 0u32;

        for op in ops {
            match op {
                Op::Add => {
                    let task = Task::command(vec![format!("--n={next}")]);
                    next += 1;
                    prop_assert!(queue.add_task(task.clone()));
                    expected.push_back(task.id());
                }
                Op::Dispatch => {
                    match queue.next_dispatch() {
                        Some(task) => {
                            prop_assert!(in_flight.is_none());
                            prop_assert_eq!(Some(task.id()), expected.pop_front());
                            prop_assert_eq!(task.status(), TaskStatus::Submitted);
                            in_flight = Some(task);
                        }
                        None => {
                            prop_assert!(
                                in_flight.is_some()
                                    || expected.is_empty()
                                    || queue.state() == QueueState::Suspended
                            );
                        }
                    }
                }
                Op::Complete => {
                    if let Some(task) = in_flight.take() {
                        prop_assert!(queue.complete(&task));
                    }
                }
                Op::Suspend => queue.suspend(),
                Op::Start => queue.start(),
            }
            prop_assert_eq!(queue.in_flight().map(|t| t.id()), in_flight.as_ref().map(|t| t.id()));
        }
    }

    #[test]
    fn reset_leaves_only_the_reset_task(pending in 0usize..10) {
        let mut queue = ComQueue::new();
        queue.start();
        let tasks: Vec<TaskRef> = (0..pending).map(|i| Task::command(vec![i.to_string()])).collect();
        for task in tasks.iter() {
            queue.add_task(task.clone());
        }

        let reset = Task::new(suitelink::task::TaskKind::Reset);
        prop_assert!(queue.reset(reset.clone()));
        prop_assert_eq!(queue.state(), QueueState::ResetState);
        prop_assert_eq!(queue.pending_len(), 1);
        for task in tasks.iter() {
            prop_assert_eq!(task.status(), TaskStatus::Aborted);
        }

        let dispatched = queue.next_dispatch().map(|t| t.id());
        prop_assert_eq!(dispatched, Some(reset.id()));
    }
}
