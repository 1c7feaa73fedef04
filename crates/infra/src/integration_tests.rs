//! Integration tests for the stock count pipeline.
//!
//! Tests: Service → Dispatcher → EventStore → EventBus → Projection → ReadModel
//!
//! Verifies:
//! - Actions walk the lifecycle and the session list follows
//! - Lookups happen before the append; a failed lookup commits nothing
//! - Notification failures never fail a committed transition
//! - Concurrent transitions at the same version: exactly one wins

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::time::{Duration, Instant};

    use rust_decimal::Decimal;
    use serde_json::Value as JsonValue;

    use stockcount_auth::{Actor, Role, RoleClaimsPolicy};
    use stockcount_core::{AggregateRoot, ExpectedVersion, TenantId, UserId};
    use stockcount_counting::{
        CategoryId, LocationId, ProductId, SessionId, SessionState, StockFilter, StockScope,
        WarehouseId,
    };
    use stockcount_events::{EventBus, EventEnvelope, InMemoryEventBus};

    use crate::adapters::{
        InMemoryAuditTrail, InMemoryInventory, RecordingTaskAssigner, SequenceNameGenerator,
    };
    use crate::config::StockCountConfig;
    use crate::event_store::InMemoryEventStore;
    use crate::projections::{SessionSummary, SessionSummaryProjection};
    use crate::read_model::InMemoryTenantStore;
    use crate::{CommandDispatcher, NewSession, StockCountError, StockCountPorts, StockCountService};

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Summaries = Arc<SessionSummaryProjection<Arc<InMemoryTenantStore<SessionId, SessionSummary>>>>;

    struct World {
        service: Arc<StockCountService<InMemoryEventStore, Bus>>,
        inventory: Arc<InMemoryInventory>,
        tasks: Arc<RecordingTaskAssigner>,
        audit: Arc<InMemoryAuditTrail>,
        summaries: Summaries,
        tenant: TenantId,
        warehouse: WarehouseId,
        shelf: LocationId,
        widget: ProductId,
        gadget: ProductId,
        clerk: Actor,
        finance: Actor,
    }

    /// One warehouse, two locations:
    /// - widget: 10 on the shelf at cost 5, category threshold 2
    /// - gadget: 4 in the bin at cost 20
    /// - an empty bin slot for a third product
    fn setup() -> World {
        stockcount_observability::init();

        let inventory = Arc::new(InMemoryInventory::new());
        let (warehouse, shelf, bin) = (WarehouseId::new(), LocationId::new(), LocationId::new());
        let (widget, gadget, empty) = (ProductId::new(), ProductId::new(), ProductId::new());
        let category = CategoryId::new();
        inventory.add_location(warehouse, shelf);
        inventory.add_location(warehouse, bin);
        inventory.put_stock(widget, shelf, Decimal::from(10));
        inventory.put_stock(gadget, bin, Decimal::from(4));
        inventory.put_stock(empty, bin, Decimal::ZERO);
        inventory.set_cost(widget, Decimal::from(5));
        inventory.set_cost(gadget, Decimal::from(20));
        inventory.set_category(widget, category);
        inventory.set_threshold(category, Decimal::from(2));

        let tasks = Arc::new(RecordingTaskAssigner::new());
        let audit = Arc::new(InMemoryAuditTrail::new());
        let ports = StockCountPorts::with_inventory(
            inventory.clone(),
            tasks.clone(),
            audit.clone(),
            Arc::new(SequenceNameGenerator::default()),
            Arc::new(RoleClaimsPolicy),
        );

        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), bus.clone());
        let service = Arc::new(StockCountService::new(dispatcher, ports, StockCountConfig::default()));

        let summaries: Summaries = Arc::new(SessionSummaryProjection::new(Arc::new(InMemoryTenantStore::new())));

        // Subscribe to the bus BEFORE any events are published
        let projection = summaries.clone();
        let bus_clone = bus.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
        std::thread::spawn(move || {
            let sub = bus_clone.subscribe();
            let _ = ready_tx.send(());
            while let Ok(env) = sub.recv() {
                if let Err(e) = projection.apply_envelope(&env) {
                    eprintln!("Failed to apply envelope: {:?}", e);
                }
            }
        });
        let _ = ready_rx.recv_timeout(Duration::from_secs(1));

        World {
            service,
            inventory,
            tasks,
            audit,
            summaries,
            tenant: TenantId::new(),
            warehouse,
            shelf,
            widget,
            gadget,
            clerk: Actor::new(UserId::new()),
            finance: Actor::new(UserId::new()).with_role(Role::FINANCE_MANAGER),
        }
    }

    /// Polls until the subscriber thread has caught up far enough for
    /// `caught_up` to hold.
    fn wait_for_projection(caught_up: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !caught_up() {
            assert!(Instant::now() < deadline, "projection did not catch up");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn exact(version: u64) -> ExpectedVersion {
        ExpectedVersion::Exact(version)
    }

    impl World {
        fn create(&self) -> SessionId {
            self.service
                .create_session(
                    self.tenant,
                    &self.clerk,
                    NewSession {
                        warehouse: Some(self.warehouse),
                        ..NewSession::default()
                    },
                )
                .unwrap()
                .id_typed()
        }

        /// Created, lines generated, every line counted at its system quantity
        /// except the widget (counted 8), then submitted.
        fn session_in_review(&self, with_finance_manager: bool) -> SessionId {
            let id = self.create();
            let mut s = self.service.generate_lines(self.tenant, &self.clerk, id, exact(1)).unwrap();
            let counts: Vec<_> = s
                .lines()
                .iter()
                .map(|l| {
                    let qty = if l.product_id() == self.widget {
                        Decimal::from(8)
                    } else {
                        l.qty_system()
                    };
                    (l.line_id(), qty)
                })
                .collect();
            for (line_id, qty) in counts {
                s = self
                    .service
                    .record_count(self.tenant, &self.clerk, id, exact(s.version()), line_id, qty, None)
                    .unwrap();
            }
            if with_finance_manager {
                s = self
                    .service
                    .assign_finance_manager(
                        self.tenant,
                        &self.clerk,
                        id,
                        exact(s.version()),
                        Some(self.finance.user_id),
                    )
                    .unwrap();
            }
            s = self.service.submit_count(self.tenant, &self.clerk, id, exact(s.version())).unwrap();
            assert_eq!(s.state(), SessionState::Review);
            id
        }
    }

    #[test]
    fn full_lifecycle_updates_session_and_read_model() {
        let w = setup();
        let id = w.session_in_review(true);

        let s = w.service.session(w.tenant, id).unwrap();
        assert_eq!(s.name(), "SC/00001");
        assert_eq!(s.lines().len(), 2);
        let widget_line = s.lines().iter().find(|l| l.product_id() == w.widget).unwrap().line_id();
        assert_eq!(s.line(widget_line).unwrap().kpi_threshold(), Decimal::from(2));

        let s = w
            .service
            .revise_review_count(w.tenant, &w.clerk, id, exact(s.version()), widget_line, Decimal::from(9))
            .unwrap();
        let s = w.service.validate(w.tenant, &w.clerk, id, exact(s.version())).unwrap();
        assert_eq!(s.state(), SessionState::Approval);

        let tasks = w.tasks.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].user, w.finance.user_id);
        assert_eq!(tasks[0].summary, "Approve Stock Count");
        assert_eq!(tasks[0].note, "Stock Count SC/00001 needs approval.");

        let s = w.service.approve(w.tenant, &w.finance, id, exact(s.version())).unwrap();
        assert_eq!(s.state(), SessionState::Done);
        assert!(s.date_end().is_some());
        assert!(s.lines().iter().all(|l| l.session_state() == SessionState::Done));

        // Widget reviewed at 9 against 10 on hand at cost 5.
        let widget = s.line(widget_line).unwrap();
        assert_eq!(widget.qty_difference(), Decimal::from(-1));
        assert_eq!(widget.variance_percentage(), Decimal::from(10));
        assert_eq!(s.totals().diff_value_net, Decimal::from(-5));
        assert_eq!(s.totals().review_value_net, Decimal::from(-5));
        assert_eq!(s.totals().qty_counted_total, Decimal::from(12));

        wait_for_projection(|| {
            w.summaries.get(w.tenant, &id).is_some_and(|row| row.state == SessionState::Done)
        });

        let row = w.summaries.get(w.tenant, &id).unwrap();
        assert_eq!(row.state, SessionState::Done);
        assert_eq!(row.line_count, 2);
        assert_eq!(row.finance_manager, Some(w.finance.user_id));
        assert!(row.review_date.is_some() && row.approval_date.is_some() && row.date_end.is_some());
    }

    #[test]
    fn explicit_name_and_filter_are_kept() {
        let w = setup();
        let s = w
            .service
            .create_session(
                w.tenant,
                &w.clerk,
                NewSession {
                    name: Some("Year end".to_string()),
                    warehouse: Some(w.warehouse),
                    filter: Some(StockFilter::IncludeZero),
                    ..NewSession::default()
                },
            )
            .unwrap();
        assert_eq!(s.name(), "Year end");
        assert_eq!(s.owner(), Some(w.clerk.user_id));

        let s = w.service.generate_lines(w.tenant, &w.clerk, s.id_typed(), exact(1)).unwrap();
        assert_eq!(s.lines().len(), 3);
    }

    #[test]
    fn regenerating_lines_discards_counts() {
        let w = setup();
        let id = w.create();
        let s = w.service.generate_lines(w.tenant, &w.clerk, id, exact(1)).unwrap();
        let first = s.lines()[0].line_id();
        let s = w
            .service
            .record_count(w.tenant, &w.clerk, id, exact(s.version()), first, Decimal::from(3), Some("4006381".into()))
            .unwrap();
        assert_eq!(s.line(first).unwrap().scanned_by(), Some(w.clerk.user_id));

        w.inventory.put_stock(w.widget, w.shelf, Decimal::from(12));
        let s = w.service.generate_lines(w.tenant, &w.clerk, id, exact(s.version())).unwrap();

        assert!(s.line(first).is_none());
        assert!(s.lines().iter().all(|l| l.qty_counted().is_zero()));
        let widget = s.lines().iter().find(|l| l.product_id() == w.widget).unwrap();
        assert_eq!(widget.qty_system(), Decimal::from(12));
    }

    #[test]
    fn generating_without_warehouse_is_refused() {
        let w = setup();
        let s = w
            .service
            .create_session(w.tenant, &w.clerk, NewSession::default())
            .unwrap();

        let err = w
            .service
            .generate_lines(w.tenant, &w.clerk, s.id_typed(), exact(1))
            .unwrap_err();
        assert!(matches!(err, StockCountError::Validation(_)));
    }

    #[test]
    fn inventory_outage_commits_nothing() {
        let w = setup();
        let id = w.create();
        w.inventory.set_inventory_offline(true);

        let err = w.service.generate_lines(w.tenant, &w.clerk, id, exact(1)).unwrap_err();
        assert!(matches!(err, StockCountError::Provider(_)));

        let s = w.service.session(w.tenant, id).unwrap();
        assert_eq!(s.version(), 1);
        assert_eq!(s.state(), SessionState::Draft);
        assert_eq!(w.service.dispatcher().store().all_events(w.tenant).unwrap().len(), 1);
    }

    #[test]
    fn validate_without_finance_manager_is_refused() {
        let w = setup();
        let id = w.session_in_review(false);
        let version = w.service.session(w.tenant, id).unwrap().version();

        let err = w.service.validate(w.tenant, &w.clerk, id, exact(version)).unwrap_err();
        assert!(err.is_user_correctable());
        match err {
            StockCountError::Validation(msg) => assert!(msg.contains("finance manager")),
            e => panic!("Expected Validation, got: {:?}", e),
        }
        assert_eq!(w.service.session(w.tenant, id).unwrap().state(), SessionState::Review);
        assert!(w.tasks.tasks().is_empty());
    }

    #[test]
    fn recount_then_reject_posts_audit_messages() {
        let w = setup();
        let id = w.session_in_review(true);
        let version = w.service.session(w.tenant, id).unwrap().version();

        let s = w
            .service
            .request_recount(w.tenant, &w.finance, id, exact(version), "  shelf B3 missed ")
            .unwrap();
        assert_eq!(s.state(), SessionState::InProgress);
        // Counted figures survive a recount.
        assert_eq!(s.totals().qty_counted_total, Decimal::from(12));

        let s = w.service.submit_count(w.tenant, &w.clerk, id, exact(s.version())).unwrap();
        let s = w.service.validate(w.tenant, &w.clerk, id, exact(s.version())).unwrap();

        let err = w
            .service
            .reject(w.tenant, &w.finance, id, exact(s.version()), "   ")
            .unwrap_err();
        assert!(matches!(err, StockCountError::Validation(_)));

        let s = w
            .service
            .reject(w.tenant, &w.finance, id, exact(s.version()), "values look wrong")
            .unwrap();
        assert_eq!(s.state(), SessionState::Rejected);
        assert_eq!(s.rejection_reason(), Some("values look wrong"));
        assert_eq!(s.audit_log().len(), 2);

        let messages = w.audit.messages_for(id);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "Action: recount. Reason: shelf B3 missed");
        assert_eq!(messages[1].text, "Action: reject. Reason: values look wrong");
        assert!(messages.iter().all(|m| m.author == w.finance.user_id));

        wait_for_projection(|| !w.summaries.list_in_state(w.tenant, SessionState::Rejected).is_empty());
        assert_eq!(w.summaries.list_in_state(w.tenant, SessionState::Rejected).len(), 1);
    }

    #[test]
    fn refusal_outside_review_or_approval_is_an_invalid_transition() {
        let w = setup();
        let id = w.create();
        let err = w
            .service
            .reject(w.tenant, &w.finance, id, exact(1), "not yet")
            .unwrap_err();
        assert!(matches!(err, StockCountError::InvalidTransition(_)));
        assert!(w.audit.messages_for(id).is_empty());
    }

    #[test]
    fn failing_notifications_do_not_fail_committed_transitions() {
        let w = setup();
        let id = w.session_in_review(true);
        let version = w.service.session(w.tenant, id).unwrap().version();
        w.tasks.set_failing(true);
        w.audit.set_failing(true);

        let s = w.service.validate(w.tenant, &w.clerk, id, exact(version)).unwrap();
        assert_eq!(s.state(), SessionState::Approval);
        assert!(w.tasks.tasks().is_empty());

        let s = w
            .service
            .request_recount(w.tenant, &w.finance, id, exact(s.version()), "recheck")
            .unwrap();
        assert_eq!(s.state(), SessionState::InProgress);
        assert_eq!(s.audit_log().len(), 1);
        assert!(w.audit.messages_for(id).is_empty());
    }

    #[test]
    fn stale_expected_version_is_a_conflict() {
        let w = setup();
        let id = w.create();
        w.service.add_attendee(w.tenant, &w.clerk, id, exact(1), UserId::new()).unwrap();

        let err = w
            .service
            .change_scope(w.tenant, &w.clerk, id, exact(1), StockScope::warehouse(w.warehouse))
            .unwrap_err();
        assert!(matches!(err, StockCountError::Conflict(_)));

        let err = w.service.generate_lines(w.tenant, &w.clerk, id, exact(1)).unwrap_err();
        assert!(matches!(err, StockCountError::Conflict(_)));
    }

    #[test]
    fn attendee_changes_are_idempotent() {
        let w = setup();
        let id = w.create();
        let user = UserId::new();

        let s = w.service.add_attendee(w.tenant, &w.clerk, id, exact(1), user).unwrap();
        assert_eq!(s.version(), 2);
        let s = w.service.add_attendee(w.tenant, &w.clerk, id, ExpectedVersion::Any, user).unwrap();
        assert_eq!(s.version(), 2);
        assert_eq!(s.attendees().len(), 1);

        let s = w.service.remove_attendee(w.tenant, &w.clerk, id, exact(2), user).unwrap();
        assert!(s.attendees().is_empty());
    }

    #[test]
    fn concurrent_transitions_at_the_same_version_let_exactly_one_win() {
        let w = setup();
        let id = w.session_in_review(true);
        let version = w.service.session(w.tenant, id).unwrap().version();

        let barrier = Arc::new(Barrier::new(2));
        let validate = {
            let (service, barrier, clerk, tenant) = (w.service.clone(), barrier.clone(), w.clerk.clone(), w.tenant);
            std::thread::spawn(move || {
                barrier.wait();
                service.validate(tenant, &clerk, id, exact(version))
            })
        };
        let recount = {
            let (service, barrier, finance, tenant) = (w.service.clone(), barrier.clone(), w.finance.clone(), w.tenant);
            std::thread::spawn(move || {
                barrier.wait();
                service.request_recount(tenant, &finance, id, exact(version), "race")
            })
        };

        let results = [validate.join().unwrap(), recount.join().unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(StockCountError::Conflict(_))))
        );

        let s = w.service.session(w.tenant, id).unwrap();
        assert_eq!(s.version(), version + 1);
    }

    #[test]
    fn refresh_costs_revalues_lines() {
        let w = setup();
        let id = w.create();
        let s = w.service.generate_lines(w.tenant, &w.clerk, id, exact(1)).unwrap();

        w.inventory.set_cost(w.widget, Decimal::from(7));
        let s = w.service.refresh_costs(w.tenant, &w.clerk, id, exact(s.version())).unwrap();
        let widget = s.lines().iter().find(|l| l.product_id() == w.widget).unwrap();
        assert_eq!(widget.unit_cost(), Decimal::from(7));
        assert_eq!(widget.product_value_before(), Decimal::from(70));

        // A costing outage values lines at zero instead of failing.
        w.inventory.set_costing_offline(true);
        let s = w.service.refresh_costs(w.tenant, &w.clerk, id, exact(s.version())).unwrap();
        let gadget = s.lines().iter().find(|l| l.product_id() == w.gadget).unwrap();
        assert!(gadget.unit_cost().is_zero());
    }

    #[test]
    fn oversized_count_is_refused_and_session_stays_usable() {
        let w = setup();
        let id = w.create();
        let s = w.service.generate_lines(w.tenant, &w.clerk, id, exact(1)).unwrap();
        let line_id = s.lines()[0].line_id();

        let huge = Decimal::from_i128_with_scale(10i128.pow(28), 0);
        let err = w
            .service
            .record_count(w.tenant, &w.clerk, id, exact(s.version()), line_id, huge, None)
            .unwrap_err();
        assert!(matches!(err, StockCountError::Validation(_)));
        assert!(err.is_user_correctable());
        assert_eq!(w.service.session(w.tenant, id).unwrap().version(), s.version());

        let s = w
            .service
            .record_count(w.tenant, &w.clerk, id, exact(s.version()), line_id, Decimal::from(3), None)
            .unwrap();
        assert_eq!(s.lines()[0].qty_counted(), Decimal::from(3));
    }

    #[test]
    fn rejected_session_is_recounted_with_its_lines_intact() {
        let w = setup();
        let id = w.session_in_review(true);
        let version = w.service.session(w.tenant, id).unwrap().version();
        let s = w
            .service
            .reject(w.tenant, &w.finance, id, exact(version), "wrong shelf labels")
            .unwrap();
        let counted: Vec<_> = s
            .lines()
            .iter()
            .map(|l| (l.line_id(), l.qty_counted(), l.qty_review_counted()))
            .collect();

        let s = w
            .service
            .request_recount(w.tenant, &w.finance, id, exact(s.version()), "relabelled, count again")
            .unwrap();
        assert_eq!(s.state(), SessionState::InProgress);
        let after: Vec<_> = s
            .lines()
            .iter()
            .map(|l| (l.line_id(), l.qty_counted(), l.qty_review_counted()))
            .collect();
        assert_eq!(after, counted);
        assert_eq!(w.audit.messages_for(id).len(), 2);

        wait_for_projection(|| {
            w.summaries.get(w.tenant, &id).is_some_and(|row| row.state == SessionState::InProgress)
        });
    }

    #[test]
    fn finance_manager_requires_assignment_and_group() {
        let w = setup();
        let id = w.session_in_review(true);

        assert!(w.service.is_finance_manager(w.tenant, id, &w.finance).unwrap());

        let same_user_without_group = Actor::new(w.finance.user_id);
        assert!(!w.service.is_finance_manager(w.tenant, id, &same_user_without_group).unwrap());

        let other_member = Actor::new(UserId::new()).with_role(Role::FINANCE_MANAGER);
        assert!(!w.service.is_finance_manager(w.tenant, id, &other_member).unwrap());
    }

    #[test]
    fn sessions_are_tenant_isolated() {
        let w = setup();
        let id = w.create();

        let err = w.service.session(TenantId::new(), id).unwrap_err();
        assert!(matches!(err, StockCountError::NotFound));

        let err = w.service.submit_count(TenantId::new(), &w.clerk, id, ExpectedVersion::Any).unwrap_err();
        assert!(matches!(err, StockCountError::NotFound));

        wait_for_projection(|| !w.summaries.list(w.tenant).is_empty());
        assert!(w.summaries.list(TenantId::new()).is_empty());
        assert_eq!(w.summaries.list(w.tenant).len(), 1);
    }

    #[test]
    fn rebuilt_session_list_matches_live_projection() {
        let w = setup();
        w.session_in_review(true);
        w.create();

        let rebuilt = SessionSummaryProjection::new(InMemoryTenantStore::new());
        let envelopes = w
            .service
            .dispatcher()
            .store()
            .all_events(w.tenant)
            .unwrap()
            .iter()
            .map(|e| e.to_envelope())
            .collect::<Vec<_>>();
        rebuilt.rebuild_from_scratch(envelopes).unwrap();

        wait_for_projection(|| rebuilt.list(w.tenant) == w.summaries.list(w.tenant));
        assert_eq!(rebuilt.list(w.tenant), w.summaries.list(w.tenant));
        assert_eq!(rebuilt.list(w.tenant).len(), 2);
    }
}
