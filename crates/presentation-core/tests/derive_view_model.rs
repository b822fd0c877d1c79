//! Integration tests for the #[derive(ViewModel)] macro.

use std::sync::Arc;

use presentation_core::{
    Property, PropertyKind, Transactional, TrxViewModel, ViewModel, ViewModelBase, ViewModelCollection, create,
    names,
};
use presentation_macros::ViewModel;

#[derive(ViewModel)]
#[view_model(transactional, ignore_dirty = ["preview"])]
struct Order {
    base: ViewModelBase,

    #[property]
    reference: Property<Option<String>>,

    #[property(setter = "set_quantity")]
    quantity: Property<u32>,

    #[property(name = "unit_price")]
    price: Property<u64>,

    #[property]
    preview: Property<String>,

    #[child]
    customer: Property<Option<Arc<Customer>>>,

    #[collection]
    lines: ViewModelCollection<OrderLine>,

    // Not part of the table.
    revision: u32,
}

impl Order {
    fn new() -> Arc<Self> {
        create(|base| {
            let lines = ViewModelCollection::new(&base);
            Order {
                base,
                reference: Property::default(),
                quantity: Property::new(1),
                price: Property::default(),
                preview: Property::default(),
                customer: Property::default(),
                lines,
                revision: 0,
            }
        })
    }

    fn set_quantity(&self, quantity: u32) {
        self.base
            .set_property_validated(&self.quantity, "quantity", quantity, |q| {
                if *q == 0 {
                    vec!["Quantity must be positive".to_string()]
                } else {
                    Vec::new()
                }
            });
    }
}

#[derive(ViewModel)]
struct Customer {
    base: ViewModelBase,

    #[property]
    name: Property<String>,
}

#[derive(ViewModel)]
#[view_model(transactional)]
struct OrderLine {
    base: ViewModelBase,

    #[property]
    sku: Property<String>,
}

fn line(sku: &str) -> Arc<OrderLine> {
    create(|base| OrderLine {
        base,
        sku: Property::new(sku.to_string()),
    })
}

fn setup() -> Arc<Order> {
    Order::new()
}

// ===== Generated table =====

#[test]
fn test_table_lists_marked_fields_in_order() {
    let table = Order::property_table();
    let names: Vec<&str> = table.names().collect();
    assert_eq!(
        names,
        vec!["reference", "quantity", "unit_price", "preview", "customer", "lines"]
    );
    assert_eq!(table.get("customer").map(|d| d.kind()), Some(PropertyKind::Child));
    assert_eq!(table.get("lines").map(|d| d.kind()), Some(PropertyKind::Collection));
    assert_eq!(table.get("quantity").map(|d| d.kind()), Some(PropertyKind::Value));
    assert!(table.get("revision").is_none());
}

#[test]
fn test_table_is_shared() {
    assert!(std::ptr::eq(Order::property_table(), Order::property_table()));
}

#[test]
fn test_transactional_only_when_requested() {
    let order = setup();
    assert!(order.as_transactional().is_some());

    let customer = create(|base| Customer {
        base,
        name: Property::default(),
    });
    assert!(customer.as_transactional().is_none());
    assert_eq!(order.revision, 0);
}

// ===== Behaviour =====

#[test]
fn test_ignored_property_does_not_dirty() {
    let order = setup();
    order.base().set_property(&order.preview, "preview", "draft".to_string());
    assert!(!order.base().is_dirty());

    order.base().set_property(&order.price, "unit_price", 250);
    assert!(order.base().is_dirty());
}

#[test]
fn test_custom_setter_used_on_rollback() {
    let order = setup();
    order.set_quantity(0);
    assert!(order.base().has_errors());
    assert_eq!(order.base().errors(Some("quantity")).len(), 1);

    // The baseline quantity is 1; restoring it through the validating
    // setter clears the error.
    order.reject_changes().unwrap();
    assert_eq!(order.quantity.get(), 1);
    assert!(order.base().is_valid());
}

#[test]
fn test_child_nodes_cover_children_and_collections() {
    let order = setup();
    let customer = create(|base| Customer {
        base,
        name: Property::new("Moebius".to_string()),
    });
    order.base().set_child(&order.customer, "customer", Some(customer.clone()));
    order.lines.add_range([line("SR-1"), line("SR-2")]);

    let children = order.child_nodes();
    assert_eq!(children.len(), 3);
    assert_eq!(children[0].base().type_name(), customer.base().type_name());
    assert!(customer.base().parent().is_some());
}

#[test]
fn test_parent_changes_are_tracked() {
    let order = setup();
    let first = line("BO-1");
    order.base().set_dirty(false);

    order.lines.add(first.clone());
    assert!(first.base().is_dirty());
    assert!(order.base().is_dirty());

    let changes = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = changes.clone();
    first.base().property_changed().connect(move |change| sink.lock().push(change.name()));
    order.lines.clear();
    assert!(changes.lock().contains(&Some(names::PARENT)));
}
