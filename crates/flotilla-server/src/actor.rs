use std::future::Future;
use std::time::Duration;

use log::error;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinSet};

const ACTOR_CHANNEL_SIZE: usize = 8;

#[tonic::async_trait]
pub trait Actor: Sized + Send + 'static {
    type Message: Send + 'static;
    type Options;

    fn name() -> &'static str;
    fn new(options: Self::Options) -> Self;
    async fn start(&mut self, ctx: &mut ActorContext<Self>);
    /// Process one message and return the next action.
    /// This method must not invoke any blocking functions, otherwise the actor
    /// event loop would be blocked since all messages are processed sequentially
    /// in a single task. If the actor needs to perform async operations, it
    /// should spawn them via [`ActorContext::spawn`].
    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: Self::Message) -> ActorAction;
    async fn stop(self, ctx: &mut ActorContext<Self>);
}

pub enum ActorAction {
    Continue,
    Stop,
}

pub struct ActorContext<T: Actor> {
    handle: ActorHandle<T>,
    /// Tasks spawned by the actor when processing messages.
    /// All these tasks are aborted when the context is dropped.
    tasks: JoinSet<()>,
}

impl<T: Actor> ActorContext<T> {
    fn new(handle: &ActorHandle<T>) -> Self {
        Self {
            handle: handle.clone(),
            tasks: JoinSet::new(),
        }
    }

    pub fn handle(&self) -> &ActorHandle<T> {
        &self.handle
    }

    /// Post a message to the actor's own mailbox without blocking the handler.
    pub fn send(&mut self, message: T::Message) {
        let handle = self.handle.clone();
        self.spawn(async move {
            let _ = handle.send(message).await;
        });
    }

    /// Post a message to the actor's own mailbox at or after the given delay.
    pub fn send_with_delay(&mut self, message: T::Message, delay: Duration) {
        let handle = self.handle.clone();
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = handle.send(message).await;
        });
    }

    /// Spawn a task and save the handle in the context.
    pub fn spawn(&mut self, task: impl Future<Output = ()> + Send + 'static) -> AbortHandle {
        self.tasks.spawn(task)
    }

    /// Join tasks that have completed and log panics.
    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    error!("failed to join task spawned by actor: {e}");
                }
            }
        }
    }
}

pub struct ActorHandle<T: Actor> {
    sender: mpsc::Sender<T::Message>,
    stopped: watch::Receiver<bool>,
}

impl<T: Actor> Clone for ActorHandle<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<T: Actor> ActorHandle<T> {
    pub async fn send(
        &self,
        message: T::Message,
    ) -> Result<(), mpsc::error::SendError<T::Message>> {
        self.sender.send(message).await
    }

    pub async fn wait_for_stop(mut self) {
        // The receiver error is ignored since the sender must have been
        // dropped in this case, which means the actor has stopped.
        let _ = self.stopped.wait_for(|x| *x).await;
    }
}

pub struct ActorSystem {
    tasks: JoinSet<()>,
}

impl Default for ActorSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorSystem {
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
        }
    }

    pub fn spawn<T: Actor>(&mut self, options: T::Options) -> ActorHandle<T> {
        let (tx, rx) = mpsc::channel(ACTOR_CHANNEL_SIZE);
        let (stopped_tx, stopped_rx) = watch::channel(false);
        let handle = ActorHandle {
            sender: tx,
            stopped: stopped_rx,
        };
        let runner = ActorRunner {
            actor: T::new(options),
            ctx: ActorContext::new(&handle),
            receiver: rx,
            stopped: stopped_tx,
        };
        self.tasks.spawn(runner.run());
        handle
    }

    /// Wait for all actors spawned in this system to stop.
    pub async fn join(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }
}

struct ActorRunner<T: Actor> {
    actor: T,
    ctx: ActorContext<T>,
    receiver: mpsc::Receiver<T::Message>,
    stopped: watch::Sender<bool>,
}

impl<T: Actor> ActorRunner<T> {
    async fn run(mut self) {
        self.actor.start(&mut self.ctx).await;
        while let Some(message) = self.receiver.recv().await {
            let action = self.actor.receive(&mut self.ctx, message);
            match action {
                ActorAction::Continue => {}
                ActorAction::Stop => {
                    break;
                }
            }
            self.ctx.reap();
        }
        self.receiver.close();
        self.actor.stop(&mut self.ctx).await;
        let _ = self.stopped.send(true);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;

    struct TestActor;

    enum TestMessage {
        Echo {
            value: String,
            reply: oneshot::Sender<String>,
        },
        EchoLater {
            value: String,
            delay: Duration,
            reply: oneshot::Sender<String>,
        },
        Reply {
            value: String,
            reply: oneshot::Sender<String>,
        },
        Stop,
    }

    #[tonic::async_trait]
    impl Actor for TestActor {
        type Message = TestMessage;
        type Options = ();

        fn name() -> &'static str {
            "TestActor"
        }

        fn new(_options: Self::Options) -> Self {
            Self
        }

        async fn start(&mut self, _ctx: &mut ActorContext<Self>) {}

        fn receive(&mut self, ctx: &mut ActorContext<Self>, message: Self::Message) -> ActorAction {
            match message {
                TestMessage::Echo { value, reply } => {
                    let _ = reply.send(value.to_uppercase());
                    ActorAction::Continue
                }
                TestMessage::EchoLater {
                    value,
                    delay,
                    reply,
                } => {
                    ctx.send_with_delay(TestMessage::Reply { value, reply }, delay);
                    ActorAction::Continue
                }
                TestMessage::Reply { value, reply } => {
                    let _ = reply.send(value);
                    ActorAction::Continue
                }
                TestMessage::Stop => ActorAction::Stop,
            }
        }

        async fn stop(self, _ctx: &mut ActorContext<Self>) {}
    }

    #[tokio::test]
    async fn test_actor_handle_send() {
        let mut system = ActorSystem::new();
        let handle = system.spawn::<TestActor>(());
        let (tx, rx) = oneshot::channel();
        let result = handle
            .send(TestMessage::Echo {
                value: "hello".to_string(),
                reply: tx,
            })
            .await;
        assert!(matches!(result, Ok(())));
        assert_eq!(rx.await, Ok("HELLO".to_string()));
    }

    #[tokio::test]
    async fn test_actor_delayed_self_message() {
        let mut system = ActorSystem::new();
        let handle = system.spawn::<TestActor>(());
        let (tx, rx) = oneshot::channel();
        handle
            .send(TestMessage::EchoLater {
                value: "later".to_string(),
                delay: Duration::from_millis(10),
                reply: tx,
            })
            .await
            .unwrap();
        assert_eq!(rx.await, Ok("later".to_string()));
    }

    #[tokio::test]
    async fn test_actor_wait_for_stop() {
        let mut system = ActorSystem::new();
        let handle = system.spawn::<TestActor>(());
        let result = handle.send(TestMessage::Stop).await;
        assert!(matches!(result, Ok(())));

        handle.clone().wait_for_stop().await;
        // Multiple handles should be able to wait for the actor to stop.
        handle.wait_for_stop().await;
        system.join().await;
    }
}
