//! Integration tests for mapping view model trees to data records.

use std::sync::Arc;

use presentation_core::dto::{DataRecord, DtoError, DtoMapper, FieldValue, RecordSchema};
use presentation_core::{Property, ViewModel, ViewModelBase, ViewModelCollection, create};
use presentation_macros::ViewModel;
use serde_json::json;

#[derive(ViewModel)]
struct Cat {
    base: ViewModelBase,

    #[property]
    nickname: Property<Option<String>>,

    #[property]
    favorite_food: Property<Vec<String>>,

    #[child]
    fur: Property<Option<Arc<Fur>>>,

    #[collection]
    paws: ViewModelCollection<Paw>,
}

impl Cat {
    fn new() -> Arc<Self> {
        create(|base| {
            let paws = ViewModelCollection::new(&base);
            Cat {
                base,
                nickname: Property::default(),
                favorite_food: Property::default(),
                fur: Property::default(),
                paws,
            }
        })
    }
}

#[derive(ViewModel)]
struct Fur {
    base: ViewModelBase,

    #[property]
    description: Property<Option<String>>,
}

impl Fur {
    fn new() -> Arc<Self> {
        create(|base| Fur {
            base,
            description: Property::default(),
        })
    }
}

#[derive(ViewModel)]
struct Paw {
    base: ViewModelBase,

    #[property]
    steps: Property<u32>,
}

impl Paw {
    fn new() -> Arc<Self> {
        create(|base| Paw {
            base,
            steps: Property::default(),
        })
    }
}

#[derive(ViewModel)]
struct Knot {
    base: ViewModelBase,

    #[child]
    other: Property<Option<Arc<Knot>>>,

    #[collection]
    others: ViewModelCollection<Knot>,
}

impl Knot {
    fn new() -> Arc<Self> {
        create(|base| {
            let others = ViewModelCollection::new(&base);
            Knot {
                base,
                other: Property::default(),
                others,
            }
        })
    }

    fn set_other(&self, other: Option<Arc<Knot>>) {
        self.base.set_child(&self.other, "other", other);
    }
}

#[derive(ViewModel)]
struct Person {
    base: ViewModelBase,

    #[property]
    name: Property<Option<String>>,

    #[property]
    age: Property<u32>,
}

impl Person {
    fn new() -> Arc<Self> {
        create(|base| Person {
            base,
            name: Property::default(),
            age: Property::default(),
        })
    }
}

#[derive(ViewModel)]
struct Stray {
    base: ViewModelBase,
}

fn setup() -> DtoMapper {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    DtoMapper::builder()
        .record(RecordSchema::new("CatRecord").fields(["nickname", "favorite_food", "fur", "paws"]))
        .record(RecordSchema::new("FurRecord").field("description"))
        .record(RecordSchema::new("PawRecord").field("steps"))
        .record(RecordSchema::new("KnotRecord").fields(["other", "others"]))
        .record(RecordSchema::new("PersonRecord").fields(["person_name", "person_age"]))
        .record(RecordSchema::new("LegacyPerson").fields(["person_name", "years"]))
        .view_model::<Cat, _>(Cat::new, |m| {
            m.link("CatRecord")
                .value("nickname", "nickname", |c| &c.nickname)
                .value("favorite_food", "favorite_food", |c| &c.favorite_food)
                .child("fur", "fur", |c| &c.fur)
                .collection("paws", "paws", |c| &c.paws)
        })
        .view_model::<Fur, _>(Fur::new, |m| {
            m.link("FurRecord").value("description", "description", |f| &f.description)
        })
        .view_model::<Paw, _>(Paw::new, |m| m.link("PawRecord").value("steps", "steps", |p| &p.steps))
        .view_model::<Knot, _>(Knot::new, |m| {
            m.link("KnotRecord")
                .child("other", "other", |k| &k.other)
                .collection("others", "others", |k| &k.others)
        })
        .view_model::<Person, _>(Person::new, |m| {
            m.link("PersonRecord")
                .link("LegacyPerson")
                .value("name", "person_name", |p| &p.name)
                .for_record("PersonRecord", |m| m.value("age", "person_age", |p| &p.age))
                .for_record("LegacyPerson", |m| m.value("age", "years", |p| &p.age))
        })
        .build()
        .unwrap()
}

fn paw_record(steps: u32) -> Arc<DataRecord> {
    let record = DataRecord::new("PawRecord");
    record.set_value("steps", json!(steps));
    record
}

// ===== Round trips =====

#[test]
fn test_empty_record_round_trip() {
    let mapper = setup();
    let empty = mapper.new_record("CatRecord").unwrap();

    let cat = mapper.to_view_model::<Cat>(&empty).unwrap();
    assert_eq!(cat.nickname.get(), None);
    assert!(cat.favorite_food.get().is_empty());
    assert!(cat.fur.get().is_none());
    assert!(cat.paws.is_empty());

    let record = mapper.to_record(cat.as_ref()).unwrap();
    assert_eq!(record.record_type(), "CatRecord");
    for field in mapper.schema("CatRecord").unwrap().field_names() {
        let value = record.get(field);
        let empty = match &value {
            FieldValue::Value(v) => v.is_null() || v.as_array().is_some_and(|a| a.is_empty()),
            FieldValue::Records(list) => list.is_empty(),
            FieldValue::Record(_) => false,
        };
        assert!(empty, "field `{field}` is {value:?}");
    }
}

#[test]
fn test_nested_round_trip() {
    let mapper = setup();
    let fur = DataRecord::new("FurRecord");
    fur.set_value("description", json!("tabby"));

    let cat_record = DataRecord::new("CatRecord");
    cat_record.set_value("nickname", json!("Kitty"));
    cat_record.set_value("favorite_food", json!(["fish", "mice"]));
    cat_record.set_record("fur", Some(fur));
    cat_record.set_records("paws", vec![paw_record(3), paw_record(4)]);

    let cat = mapper.to_view_model::<Cat>(&cat_record).unwrap();
    assert_eq!(cat.nickname.get().as_deref(), Some("Kitty"));
    assert_eq!(cat.favorite_food.get(), vec!["fish".to_string(), "mice".to_string()]);

    let fur = cat.fur.get().unwrap();
    assert_eq!(fur.description.get().as_deref(), Some("tabby"));
    assert!(fur.base().parent_as::<Cat>().is_some_and(|p| Arc::ptr_eq(&p, &cat)));

    assert_eq!(cat.paws.len(), 2);
    assert_eq!(cat.paws.get(1).map(|p| p.steps.get()), Some(4));
    assert!(cat.paws.iter().all(|p| p.base().parent().is_some()));

    let back = mapper.to_record(cat.as_ref()).unwrap();
    assert_eq!(
        back.to_json().unwrap(),
        json!({
            "nickname": "Kitty",
            "favorite_food": ["fish", "mice"],
            "fur": { "description": "tabby" },
            "paws": [{ "steps": 3 }, { "steps": 4 }],
        })
    );
}

#[test]
fn test_shared_record_converts_twice() {
    let mapper = setup();
    let shared = DataRecord::new("KnotRecord");
    let root = DataRecord::new("KnotRecord");
    root.set_record("other", Some(shared.clone()));
    root.set_records("others", vec![shared.clone(), shared]);

    let knot = mapper.to_view_model::<Knot>(&root).unwrap();
    let first = knot.others.get(0).unwrap();
    let second = knot.others.get(1).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(knot.other.get().is_some());
}

// ===== Cycles =====

#[test]
fn test_cyclic_record_fails() {
    let mapper = setup();
    let record = DataRecord::new("KnotRecord");
    record.set_record("other", Some(record.clone()));

    let result = mapper.to_view_model::<Knot>(&record);
    assert!(matches!(result, Err(DtoError::CyclicReference { .. })));

    record.set_record("other", None);
}

#[test]
fn test_cyclic_record_through_list_fails() {
    let mapper = setup();
    let outer = DataRecord::new("KnotRecord");
    let inner = DataRecord::new("KnotRecord");
    outer.set_records("others", vec![inner.clone()]);
    inner.set_record("other", Some(outer.clone()));

    let result = mapper.to_view_model::<Knot>(&outer);
    assert!(matches!(result, Err(DtoError::CyclicReference { .. })));

    inner.set_record("other", None);
}

#[test]
fn test_cyclic_view_model_fails() {
    let mapper = setup();
    let first = Knot::new();
    let second = Knot::new();
    first.set_other(Some(second.clone()));
    second.set_other(Some(first.clone()));

    let result = mapper.to_record(first.as_ref());
    assert!(matches!(result, Err(DtoError::CyclicReference { .. })));

    second.set_other(None);
}

// ===== Field mapping =====

#[test]
fn test_renamed_fields() {
    let mapper = setup();
    let record = DataRecord::new("PersonRecord");
    record.set_value("person_name", json!("Vorador"));
    record.set_value("person_age", json!(812));

    let person = mapper.to_view_model::<Person>(&record).unwrap();
    assert_eq!(person.name.get().as_deref(), Some("Vorador"));
    assert_eq!(person.age.get(), 812);

    let back = mapper.to_record(person.as_ref()).unwrap();
    assert_eq!(back.get("person_age").as_value(), Some(&json!(812)));
    assert!(back.get("years").is_null());
}

#[test]
fn test_record_type_scoped_fields() {
    let mapper = setup();
    let legacy = DataRecord::new("LegacyPerson");
    legacy.set_value("person_name", json!("Janos Audron"));
    legacy.set_value("years", json!(3000));

    let person = mapper.to_view_model::<Person>(&legacy).unwrap();
    assert_eq!(person.age.get(), 3000);

    let back = mapper.to_record_as(person.as_ref(), "LegacyPerson").unwrap();
    assert_eq!(back.record_type(), "LegacyPerson");
    assert_eq!(back.get("years").as_value(), Some(&json!(3000)));
    assert_eq!(back.field_names(), vec!["person_name".to_string(), "years".to_string()]);
}

// ===== Errors =====

#[test]
fn test_unmapped_view_model() {
    let mapper = setup();
    let record = DataRecord::new("CatRecord");
    let result = mapper.to_view_model::<Stray>(&record);
    assert!(matches!(result, Err(DtoError::NotLinked { .. })));

    let stray = create(|base| Stray { base });
    assert!(matches!(mapper.to_record(stray.as_ref()), Err(DtoError::NotLinked { .. })));
}

#[test]
fn test_wrong_record_type() {
    let mapper = setup();
    let record = DataRecord::new("CatRecord");
    let result = mapper.to_view_model::<Fur>(&record);
    assert!(matches!(
        result,
        Err(DtoError::RecordTypeMismatch { ref record_type, .. }) if record_type == "CatRecord"
    ));

    let person = Person::new();
    assert!(matches!(
        mapper.to_record_as(person.as_ref(), "CatRecord"),
        Err(DtoError::RecordTypeMismatch { .. })
    ));
}

#[test]
fn test_field_kind_mismatch() {
    let mapper = setup();
    let record = DataRecord::new("CatRecord");
    record.set_value("fur", json!("fluffy"));
    assert_eq!(
        mapper.to_view_model::<Cat>(&record).map(|_| ()),
        Err(DtoError::FieldKind {
            field: "fur".to_string(),
            expected: "a record",
        })
    );

    let record = DataRecord::new("CatRecord");
    record.set_record("nickname", Some(DataRecord::new("FurRecord")));
    assert!(matches!(
        mapper.to_view_model::<Cat>(&record),
        Err(DtoError::FieldKind { .. })
    ));
}

#[test]
fn test_value_conversion_failure() {
    let mapper = setup();
    let record = DataRecord::new("PawRecord");
    record.set_value("steps", json!("many"));
    assert!(matches!(
        mapper.to_view_model::<Paw>(&record),
        Err(DtoError::Serde { ref field, .. }) if field == "steps"
    ));
}

#[test]
fn test_build_rejects_unknown_field() {
    let result = DtoMapper::builder()
        .record(RecordSchema::new("FurRecord").field("description"))
        .view_model::<Fur, _>(Fur::new, |m| m.link("FurRecord").value("description", "color", |f| &f.description))
        .build();
    assert_eq!(
        result.map(|_| ()),
        Err(DtoError::UnknownField {
            record_type: "FurRecord".to_string(),
            field: "color".to_string(),
        })
    );
}

#[test]
fn test_build_rejects_unknown_record_type() {
    let result = DtoMapper::builder()
        .view_model::<Fur, _>(Fur::new, |m| m.link("Pelt"))
        .build();
    assert_eq!(result.map(|_| ()), Err(DtoError::UnknownRecordType("Pelt".to_string())));
}

#[test]
fn test_build_rejects_unlinked_scope() {
    let result = DtoMapper::builder()
        .record(RecordSchema::new("FurRecord").field("description"))
        .view_model::<Fur, _>(Fur::new, |m| {
            m.link("FurRecord")
                .for_record("Pelt", |m| m.value("description", "description", |f| &f.description))
        })
        .build();
    assert!(matches!(result, Err(DtoError::RecordTypeMismatch { .. })));
}

#[test]
fn test_build_rejects_missing_link() {
    let result = DtoMapper::builder().view_model::<Stray, _>(|| create(|base| Stray { base }), |m| m).build();
    assert!(matches!(result, Err(DtoError::NotLinked { .. })));
}
