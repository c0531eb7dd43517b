use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{
    AggregateRoot, DomainError, DomainId, DomainResult, EntityId, MaterialId, OrderId, UserId,
    codes,
};

use crate::demand::{DemandItem, DemandLedger};
use crate::status::{ItemStatus, OrderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Purchase,
    Sales,
    Transfer,
}

/// Payment captured alongside an order mutation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Amount in smallest currency unit.
    pub amount: u64,
    pub option: Option<String>,
}

/// Aggregate root: Order.
///
/// Fields are public so adapters can map them to storage; mutation happens
/// only through the lifecycle manager while the order's lock is held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub domain_id: DomainId,
    pub customer_id: EntityId,
    pub vendor_id: Option<EntityId>,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub items: Vec<DemandItem>,
    /// Total in smallest currency unit, tax included.
    pub total_price: u64,
    pub tax_bps: u32,
    pub currency: Option<String>,
    pub paid: u64,
    pub payment_option: Option<String>,
    pub entity_tags: Vec<String>,
    pub order_tags: Vec<String>,
    pub visible_to_customer: bool,
    pub visible_to_vendor: bool,
    pub sales_reference_id: Option<String>,
    pub purchase_reference_id: Option<String>,
    pub transfer_reference_id: Option<String>,
    pub cancelled_discrepancy_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: UserId,
    pub status_updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Order {
    pub fn new(
        id: OrderId,
        domain_id: DomainId,
        customer_id: EntityId,
        vendor_id: Option<EntityId>,
        order_type: OrderType,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            domain_id,
            customer_id,
            vendor_id,
            order_type,
            status: OrderStatus::Pending,
            items: Vec::new(),
            total_price: 0,
            tax_bps: 0,
            currency: None,
            paid: 0,
            payment_option: None,
            entity_tags: Vec::new(),
            order_tags: Vec::new(),
            visible_to_customer: true,
            visible_to_vendor: true,
            sales_reference_id: None,
            purchase_reference_id: None,
            transfer_reference_id: None,
            cancelled_discrepancy_reason: None,
            created_at: at,
            created_by: actor.clone(),
            updated_at: at,
            updated_by: actor,
            status_updated_at: at,
            version: 0,
        }
    }

    pub fn item(&self, material_id: MaterialId) -> Option<&DemandItem> {
        self.items.iter().find(|i| i.material_id == material_id)
    }

    pub fn item_mut(&mut self, material_id: MaterialId) -> Option<&mut DemandItem> {
        self.items.iter_mut().find(|i| i.material_id == material_id)
    }

    pub fn ledger(&mut self) -> DemandLedger<'_> {
        DemandLedger::new(&mut self.items)
    }

    pub fn all_items_zero(&self) -> bool {
        self.items.iter().all(|i| i.quantity == 0)
    }

    /// Recompute `total_price` from non-cancelled lines, then apply the order tax.
    ///
    /// Leaves `total_price` untouched and fails with `O006` when any step overflows.
    pub fn compute_total_price(&mut self) -> DomainResult<u64> {
        let subtotal = self
            .items
            .iter()
            .filter(|i| !i.is_cancelled())
            .try_fold(0u64, |acc, item| item.line_total().and_then(|t| acc.checked_add(t)))
            .ok_or_else(|| self.amount_out_of_range("total price"))?;
        let total = subtotal
            .checked_mul(u64::from(self.tax_bps))
            .map(|t| t / 10_000)
            .and_then(|tax| subtotal.checked_add(tax))
            .ok_or_else(|| self.amount_out_of_range("total price"))?;
        self.total_price = total;
        Ok(total)
    }

    /// Move to `status` and propagate it to every line that is not cancelled.
    /// Transition validity is checked by the caller.
    pub fn apply_status(&mut self, status: OrderStatus, actor: &UserId, at: DateTime<Utc>) {
        self.status = status;
        self.status_updated_at = at;
        self.touch(actor, at);
        let item_status = ItemStatus::from(status);
        for item in self.items.iter_mut().filter(|i| !i.is_cancelled()) {
            item.status = item_status;
            item.updated_at = at;
        }
    }

    pub fn add_payment(&mut self, payment: &PaymentRecord) -> DomainResult<()> {
        self.paid = self
            .paid
            .checked_add(payment.amount)
            .ok_or_else(|| self.amount_out_of_range("paid amount"))?;
        if payment.option.is_some() {
            self.payment_option.clone_from(&payment.option);
        }
        Ok(())
    }

    fn amount_out_of_range(&self, what: &str) -> DomainError {
        DomainError::validation_with_args(
            codes::AMOUNT_OUT_OF_RANGE,
            format!("{what} of order {} is out of range", self.id),
            [self.id.to_string()],
        )
    }

    /// Store an external reference in the slot that matches the order type.
    pub fn set_reference_id(&mut self, reference: Option<String>) {
        let slot = match self.order_type {
            OrderType::Sales => &mut self.sales_reference_id,
            OrderType::Purchase => &mut self.purchase_reference_id,
            OrderType::Transfer => &mut self.transfer_reference_id,
        };
        *slot = reference;
    }

    pub fn reference_id(&self) -> Option<&str> {
        match self.order_type {
            OrderType::Sales => self.sales_reference_id.as_deref(),
            OrderType::Purchase => self.purchase_reference_id.as_deref(),
            OrderType::Transfer => self.transfer_reference_id.as_deref(),
        }
    }

    pub fn is_visible_to_both(&self) -> bool {
        self.visible_to_customer && self.visible_to_vendor
    }

    /// Every non-cancelled line has shipped its full quantity.
    pub fn is_fully_shipped(&self) -> bool {
        self.items
            .iter()
            .filter(|i| !i.is_cancelled())
            .all(DemandItem::is_fully_shipped)
    }

    pub fn touch(&mut self, actor: &UserId, at: DateTime<Utc>) {
        self.updated_at = at;
        self.updated_by = actor.clone();
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
