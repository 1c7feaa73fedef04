use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use stockcount_core::UserId;
use stockcount_counting::{
    AuditTrail, CategoryId, CategoryThresholdStore, CostProvider, InventorySnapshotProvider,
    LocationId, LocationResolver, PortError, ProductCatalog, ProductId, QuantityRecord, SessionId,
    SessionNameGenerator, TaskAssigner, WarehouseId,
};

use crate::config::StockCountConfig;

#[derive(Debug, Default)]
struct InventoryData {
    warehouses: HashMap<WarehouseId, BTreeSet<LocationId>>,
    quants: Vec<QuantityRecord>,
    categories: HashMap<ProductId, CategoryId>,
    costs: HashMap<ProductId, Decimal>,
    thresholds: HashMap<CategoryId, Decimal>,
}

/// In-memory stock, catalog and costing data for tests/dev.
///
/// Implements every lookup port. `set_inventory_offline` and
/// `set_costing_offline` make the corresponding lookups fail.
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    data: RwLock<InventoryData>,
    inventory_offline: AtomicBool,
    costing_offline: AtomicBool,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an internal location of `warehouse`.
    pub fn add_location(&self, warehouse: WarehouseId, location: LocationId) {
        if let Ok(mut data) = self.data.write() {
            data.warehouses.entry(warehouse).or_default().insert(location);
        }
    }

    /// Set the on-hand quantity of a product at a location (no lot/package).
    pub fn put_stock(&self, product: ProductId, location: LocationId, quantity: Decimal) {
        self.put_record(QuantityRecord {
            product_id: product,
            location_id: location,
            lot_id: None,
            package_id: None,
            quantity,
        });
    }

    /// Upsert one on-hand tuple.
    pub fn put_record(&self, record: QuantityRecord) {
        if let Ok(mut data) = self.data.write() {
            let existing = data.quants.iter_mut().find(|q| {
                q.product_id == record.product_id
                    && q.location_id == record.location_id
                    && q.lot_id == record.lot_id
                    && q.package_id == record.package_id
            });
            match existing {
                Some(q) => q.quantity = record.quantity,
                None => data.quants.push(record),
            }
        }
    }

    pub fn set_category(&self, product: ProductId, category: CategoryId) {
        if let Ok(mut data) = self.data.write() {
            data.categories.insert(product, category);
        }
    }

    pub fn set_cost(&self, product: ProductId, cost: Decimal) {
        if let Ok(mut data) = self.data.write() {
            data.costs.insert(product, cost);
        }
    }

    pub fn set_threshold(&self, category: CategoryId, threshold: Decimal) {
        if let Ok(mut data) = self.data.write() {
            data.thresholds.insert(category, threshold);
        }
    }

    pub fn set_inventory_offline(&self, offline: bool) {
        self.inventory_offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_costing_offline(&self, offline: bool) {
        self.costing_offline.store(offline, Ordering::SeqCst);
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, InventoryData>, PortError> {
        self.data
            .read()
            .map_err(|_| PortError::Unavailable("inventory data lock poisoned".to_string()))
    }

    fn check_inventory(&self) -> Result<(), PortError> {
        if self.inventory_offline.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("inventory offline".to_string()));
        }
        Ok(())
    }
}

impl LocationResolver for InMemoryInventory {
    fn internal_locations(&self, warehouse: WarehouseId) -> Result<BTreeSet<LocationId>, PortError> {
        self.check_inventory()?;
        Ok(self.read()?.warehouses.get(&warehouse).cloned().unwrap_or_default())
    }
}

impl InventorySnapshotProvider for InMemoryInventory {
    fn list_quantities(
        &self,
        locations: &BTreeSet<LocationId>,
        include_zero: bool,
    ) -> Result<Vec<QuantityRecord>, PortError> {
        self.check_inventory()?;
        Ok(self
            .read()?
            .quants
            .iter()
            .filter(|q| locations.contains(&q.location_id))
            .filter(|q| include_zero || q.quantity > Decimal::ZERO)
            .cloned()
            .collect())
    }
}

impl ProductCatalog for InMemoryInventory {
    fn category_of(&self, product: ProductId) -> Result<Option<CategoryId>, PortError> {
        Ok(self.read()?.categories.get(&product).copied())
    }
}

impl CostProvider for InMemoryInventory {
    fn standard_cost(&self, product: ProductId, _as_of: NaiveDate) -> Result<Option<Decimal>, PortError> {
        if self.costing_offline.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("costing offline".to_string()));
        }
        Ok(self.read()?.costs.get(&product).copied())
    }
}

impl CategoryThresholdStore for InMemoryInventory {
    fn kpi_threshold(&self, category: CategoryId) -> Result<Option<Decimal>, PortError> {
        Ok(self.read()?.thresholds.get(&category).copied())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedTask {
    pub user: UserId,
    pub summary: String,
    pub note: String,
}

/// Task port that records every assignment.
#[derive(Debug, Default)]
pub struct RecordingTaskAssigner {
    tasks: Mutex<Vec<AssignedTask>>,
    failing: AtomicBool,
}

impl RecordingTaskAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> Vec<AssignedTask> {
        self.tasks.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl TaskAssigner for RecordingTaskAssigner {
    fn assign_task(&self, user: UserId, summary: &str, note: &str) -> Result<(), PortError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("task service offline".to_string()));
        }
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| PortError::Unavailable("task inbox lock poisoned".to_string()))?;
        tasks.push(AssignedTask {
            user,
            summary: summary.to_string(),
            note: note.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditMessage {
    pub session: SessionId,
    pub author: UserId,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// Append-only message log per session.
#[derive(Debug, Default)]
pub struct InMemoryAuditTrail {
    messages: Mutex<Vec<AuditMessage>>,
    failing: AtomicBool,
}

impl InMemoryAuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages_for(&self, session: SessionId) -> Vec<AuditMessage> {
        self.messages
            .lock()
            .map(|m| m.iter().filter(|msg| msg.session == session).cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl AuditTrail for InMemoryAuditTrail {
    fn append_message(
        &self,
        session: SessionId,
        author: UserId,
        timestamp: DateTime<Utc>,
        text: &str,
    ) -> Result<(), PortError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("message log offline".to_string()));
        }
        let mut messages = self
            .messages
            .lock()
            .map_err(|_| PortError::Unavailable("message log lock poisoned".to_string()))?;
        messages.push(AuditMessage {
            session,
            author,
            timestamp,
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Prefix + zero-padded counter (`SC/00001`, `SC/00002`, ...).
#[derive(Debug)]
pub struct SequenceNameGenerator {
    prefix: String,
    padding: usize,
    next: AtomicU64,
}

impl SequenceNameGenerator {
    pub fn new(prefix: impl Into<String>, padding: usize) -> Self {
        Self {
            prefix: prefix.into(),
            padding,
            next: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &StockCountConfig) -> Self {
        Self::new(config.sequence_prefix.clone(), config.sequence_padding)
    }
}

impl Default for SequenceNameGenerator {
    fn default() -> Self {
        Self::from_config(&StockCountConfig::default())
    }
}

impl SessionNameGenerator for SequenceNameGenerator {
    fn next_session_name(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        format!("{}{:0width$}", self.prefix, n, width = self.padding)
    }
}
