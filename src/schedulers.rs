//! Periodic jobs: re-announcing orders whose status went quiet, and finishing
//! pickup orders once their preparation time has passed.

use std::collections::HashMap;
use std::time::Duration;

use actix::{Actor, ActorFutureExt, Addr, AsyncContext, Context, Handler, Message, SpawnHandle, WrapFuture};
use chrono::Utc;

use crate::error::AppError;
use crate::lifecycle::{Caller, OrderLifecycle};
use crate::notify::Dispatcher;
use crate::services::db_models::Order;
use crate::services::db_utils::{ask, DbActor};
use crate::services::messages::{FetchPickupCandidates, FetchStaleOrders, TouchNotified, TouchPickupNotified};
use crate::types::OrderStatus;

fn cutoff(age: Duration) -> Result<chrono::NaiveDateTime, AppError> {
    let age = chrono::Duration::from_std(age).map_err(|_| AppError::validation("scheduler window out of range"))?;
    Ok(Utc::now().naive_utc() - age)
}

/// One pass of the staleness sweep. Returns how many orders were re-announced.
pub async fn sweep_once(db: &Addr<DbActor>, dispatcher: &Dispatcher, stale_after: Duration) -> Result<usize, AppError> {
    let stale = ask(db, FetchStaleOrders { cutoff: cutoff(stale_after)? }).await?;
    let mut resent = 0;

    for order in stale {
        dispatcher.notify_customer(&order, order.status).await;
        match ask(db, TouchNotified(order.id)).await {
            Ok(()) => resent += 1,
            Err(err) => tracing::error!(order_id = order.id, error = %err, "unable to stamp notification watermark"),
        }
    }

    Ok(resent)
}

pub struct StalenessSweeper {
    db: Addr<DbActor>,
    dispatcher: Dispatcher,
    interval: Duration,
    stale_after: Duration,
    running: bool,
}

impl StalenessSweeper {
    pub fn new(db: Addr<DbActor>, dispatcher: Dispatcher, interval: Duration, stale_after: Duration) -> Self {
        StalenessSweeper { db, dispatcher, interval, stale_after, running: false }
    }

    fn tick(&mut self, ctx: &mut Context<Self>) {
        // a slow pass is never overlapped by the next tick
        if self.running {
            return;
        }
        self.running = true;

        let db = self.db.clone();
        let dispatcher = self.dispatcher.clone();
        let stale_after = self.stale_after;

        ctx.spawn(
            async move { sweep_once(&db, &dispatcher, stale_after).await }
                .into_actor(self)
                .map(|res, act, _ctx| {
                    act.running = false;
                    match res {
                        Ok(0) => {}
                        Ok(resent) => tracing::info!(resent, "stale orders re-announced"),
                        Err(err) => tracing::error!(error = %err, "staleness sweep failed"),
                    }
                }),
        );
    }
}

impl Actor for StalenessSweeper {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            stale_after_secs = self.stale_after.as_secs(),
            "staleness sweeper started"
        );
        ctx.run_interval(self.interval, |act, ctx| act.tick(ctx));
    }
}

/// Finishes cooking pickup orders after a fixed preparation time, one timer per order.
pub struct PickupCompleter {
    db: Addr<DbActor>,
    lifecycle: OrderLifecycle,
    interval: Duration,
    window: Duration,
    prep: Duration,
    scheduled: HashMap<i64, SpawnHandle>,
    scanning: bool,
}

#[derive(Message)]
#[rtype(result = "usize")]
pub struct PendingCompletions;

impl PickupCompleter {
    pub fn new(
        db: Addr<DbActor>,
        lifecycle: OrderLifecycle,
        interval: Duration,
        window: Duration,
        prep: Duration,
    ) -> Self {
        PickupCompleter { db, lifecycle, interval, window, prep, scheduled: HashMap::new(), scanning: false }
    }

    fn scan(&mut self, ctx: &mut Context<Self>) {
        if self.scanning {
            return;
        }
        self.scanning = true;

        let db = self.db.clone();
        let window = self.window;

        ctx.spawn(
            async move { ask(&db, FetchPickupCandidates { cutoff: cutoff(window)? }).await }
                .into_actor(self)
                .map(|res: Result<Vec<Order>, AppError>, act, ctx| {
                    act.scanning = false;
                    match res {
                        Ok(orders) => orders.into_iter().for_each(|order| act.schedule(order.id, ctx)),
                        Err(err) => tracing::error!(error = %err, "pickup scan failed"),
                    }
                }),
        );
    }

    fn schedule(&mut self, order_id: i64, ctx: &mut Context<Self>) {
        if self.scheduled.contains_key(&order_id) {
            return;
        }

        let handle = ctx.run_later(self.prep, move |act, ctx| act.complete(order_id, ctx));
        self.scheduled.insert(order_id, handle);
        tracing::debug!(order_id, prep_secs = self.prep.as_secs(), "pickup completion scheduled");
    }

    fn complete(&mut self, order_id: i64, ctx: &mut Context<Self>) {
        let db = self.db.clone();
        let lifecycle = self.lifecycle.clone();

        ctx.spawn(
            async move {
                let done = lifecycle.transition(order_id, OrderStatus::Delivered, &Caller::system()).await?;
                if done.is_some() {
                    ask(&db, TouchPickupNotified(order_id)).await?;
                }
                Ok::<bool, AppError>(done.is_some())
            }
            .into_actor(self)
            .map(move |res, act, _ctx| {
                act.scheduled.remove(&order_id);
                match res {
                    Ok(true) => tracing::info!(order_id, "pickup order marked ready"),
                    Ok(false) => tracing::info!(order_id, "pickup order left cooking before its timer fired"),
                    Err(err) => tracing::error!(order_id, error = %err, "pickup completion failed"),
                }
            }),
        );
    }
}

impl Actor for PickupCompleter {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            prep_secs = self.prep.as_secs(),
            "pickup completer started"
        );
        self.scan(ctx);
        ctx.run_interval(self.interval, |act, ctx| act.scan(ctx));
    }
}

impl Handler<PendingCompletions> for PickupCompleter {
    type Result = usize;

    fn handle(&mut self, _msg: PendingCompletions, _ctx: &mut Self::Context) -> Self::Result {
        self.scheduled.len()
    }
}
