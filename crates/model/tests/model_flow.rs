//! End-to-end flows across the model layer: identity, associations with
//! inverse sync, owned-change aggregation, persistence through a
//! scripted mapper, and the query container's coalescing.

use core::cell::RefCell;
use std::rc::Rc;

use orrery_core::Value;
use orrery_model::{
    AssocOptions, Mapper, Model, ModelType, QueryArray, SourceState, Store, UndoOptions,
};
use orrery_reactive::{Deferred, Instance, ObsArray, Promise, PromiseStatus, Scheduler};

/// A mapper whose every capability hands back a deferred the test
/// settles explicitly.
struct ScriptedMapper {
    scheduler: Scheduler,
    deferreds: Rc<RefCell<Vec<Rc<Deferred>>>>,
    calls: Rc<RefCell<Vec<&'static str>>>,
}

impl ScriptedMapper {
    fn new(scheduler: &Scheduler) -> Rc<Self> {
        Rc::new(Self {
            scheduler: scheduler.clone(),
            deferreds: Rc::new(RefCell::new(Vec::new())),
            calls: Rc::new(RefCell::new(Vec::new())),
        })
    }

    fn record(&self, name: &'static str) -> Option<Promise> {
        self.calls.borrow_mut().push(name);
        let deferred = Rc::new(Deferred::new(&self.scheduler));
        let promise = deferred.promise();
        self.deferreds.borrow_mut().push(deferred);
        Some(promise)
    }

    fn resolve_next(&self, value: Value) {
        let deferred = self.deferreds.borrow_mut().remove(0);
        deferred.resolve(value);
    }

    fn reject_next(&self, error: Value) {
        let deferred = self.deferreds.borrow_mut().remove(0);
        deferred.reject(error);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }
}

impl Mapper for ScriptedMapper {
    fn query(&self, _opts: &Value) -> Option<Promise> {
        self.record("query")
    }
    fn get(&self, _id: &Value, _opts: &Value) -> Option<Promise> {
        self.record("get")
    }
    fn create(&self, _model: &Model, _opts: &Value) -> Option<Promise> {
        self.record("create")
    }
    fn update(&self, _model: &Model, _opts: &Value) -> Option<Promise> {
        self.record("update")
    }
    fn delete(&self, _model: &Model, _opts: &Value) -> Option<Promise> {
        self.record("delete")
    }
}

fn payload(pairs: Vec<(&str, Value)>) -> Value {
    Value::map_from(pairs)
}

fn load(mtype: &ModelType, pairs: Vec<(&str, Value)>) -> Model {
    let attrs = payload(pairs);
    mtype.load(attrs.as_map().unwrap()).unwrap()
}

fn define_person_and_todo(store: &Store) -> (ModelType, ModelType) {
    let person = store
        .define("Person")
        .attr("name", "string")
        .has_many(
            "todos",
            "Todo",
            AssocOptions {
                inverse: Some("owner".into()),
                owner: false,
            },
        )
        .build()
        .unwrap();
    let todo = store
        .define("Todo")
        .attr("name", "string")
        .has_one(
            "owner",
            "Person",
            AssocOptions {
                inverse: Some("todos".into()),
                owner: false,
            },
        )
        .build()
        .unwrap();
    (person, todo)
}

fn todos_of(person: &Model) -> ObsArray {
    ObsArray::from_value(&person.get("todos").unwrap()).unwrap()
}

#[test]
fn test_inverse_sync_from_has_one_side() {
    let store = Store::new();
    let (person, todo) = define_person_and_todo(&store);

    let p = person.create();
    let t = todo.create();

    t.set("owner", p.as_value()).unwrap();
    let todos = todos_of(&p);
    assert!(todos.contains(&t.as_value()));

    t.set("owner", Value::Null).unwrap();
    assert!(!todos_of(&p).contains(&t.as_value()));
}

#[test]
fn test_inverse_sync_from_has_many_side() {
    let store = Store::new();
    let (person, todo) = define_person_and_todo(&store);

    let p = person.create();
    let t = todo.create();

    let todos = todos_of(&p);
    todos.push(t.as_value()).unwrap();

    let owner = Instance::from_value(&t.get("owner").unwrap()).unwrap();
    assert_eq!(owner.instance_id(), p.instance().instance_id());

    todos.remove_value(&t.as_value()).unwrap();
    assert!(t.get("owner").unwrap().is_null());
}

#[test]
fn test_reassignment_moves_between_inverses() {
    let store = Store::new();
    let (person, todo) = define_person_and_todo(&store);

    let alice = person.create();
    let bob = person.create();
    let t = todo.create();

    t.set("owner", alice.as_value()).unwrap();
    t.set("owner", bob.as_value()).unwrap();

    assert!(!todos_of(&alice).contains(&t.as_value()));
    assert!(todos_of(&bob).contains(&t.as_value()));
}

#[test]
fn test_association_type_mismatch() {
    let store = Store::new();
    let (person, todo) = define_person_and_todo(&store);

    let t = todo.create();
    let not_a_person = todo.create();
    let err = t.set("owner", not_a_person.as_value()).unwrap_err();
    assert!(err.to_string().contains("owner"));

    let p = person.create();
    let err = todos_of(&p).push(Value::Integer(3)).unwrap_err();
    assert!(err.to_string().contains("todos"));
}

#[test]
fn test_id_reference_keys_load_placeholders() {
    let store = Store::new();
    let (person, _todo) = define_person_and_todo(&store);

    let p = load(
        &person,
        vec![
            ("id", Value::Integer(1)),
            (
                "todoIds",
                Value::list(vec![Value::Integer(10), Value::Integer(11)]),
            ),
        ],
    );

    let todos = todos_of(&p);
    assert_eq!(todos.len(), 2);
    let first = Instance::from_value(&todos.at(0).unwrap()).unwrap();
    assert_eq!(first.slot("id"), Some(Value::Integer(10)));

    let placeholder = store.model_for(&first).unwrap();
    assert_eq!(placeholder.source_state(), SourceState::Empty);
}

#[test]
fn test_reload_reconciles_membership() {
    let store = Store::new();
    let (person, todo) = define_person_and_todo(&store);

    let p = load(
        &person,
        vec![
            ("id", Value::Integer(1)),
            (
                "todoIds",
                Value::list(vec![Value::Integer(1), Value::Integer(2)]),
            ),
        ],
    );
    let kept = todo.local(&Value::Integer(2)).unwrap();

    load(
        &person,
        vec![
            ("id", Value::Integer(1)),
            (
                "todoIds",
                Value::list(vec![Value::Integer(2), Value::Integer(3)]),
            ),
        ],
    );

    let todos = todos_of(&p);
    assert_eq!(todos.len(), 2);
    // The surviving member is the same identity-mapped instance.
    assert!(todos.contains(&kept.as_value()));
    assert!(!p.has_changes());
}

fn define_invoice(store: &Store) -> (ModelType, ModelType) {
    let invoice = store
        .define("Invoice")
        .has_many(
            "lineItems",
            "LineItem",
            AssocOptions {
                inverse: None,
                owner: true,
            },
        )
        .build()
        .unwrap();
    let line_item = store
        .define("LineItem")
        .attr("quantity", "number")
        .attr("rate", "number")
        .build()
        .unwrap();
    (invoice, line_item)
}

#[test]
fn test_owned_changes_aggregate_under_dotted_paths() {
    let store = Store::new();
    let (invoice, _line_item) = define_invoice(&store);

    let inv = load(
        &invoice,
        vec![
            ("id", Value::Integer(8)),
            (
                "lineItems",
                Value::list(vec![payload(vec![
                    ("id", Value::Integer(10)),
                    ("quantity", Value::Integer(10)),
                    ("rate", Value::Number(3.5)),
                ])]),
            ),
        ],
    );
    assert!(!inv.has_changes());

    let items = ObsArray::from_value(&inv.get("lineItems").unwrap()).unwrap();
    let li = Instance::from_value(&items.at(0).unwrap()).unwrap();
    li.set("quantity", Value::Integer(11)).unwrap();

    assert!(inv.has_changes());
    let changes = inv.changes();
    assert_eq!(
        changes.map_get("lineItems.0.quantity"),
        Some(Value::Integer(10))
    );

    inv.undo_changes(&UndoOptions::default()).unwrap();
    assert_eq!(li.get("quantity").unwrap(), Value::Integer(10));
    assert!(!inv.has_changes());
}

#[test]
fn test_membership_changes_collapse() {
    let store = Store::new();
    let (invoice, line_item) = define_invoice(&store);

    let inv = load(&invoice, vec![("id", Value::Integer(1))]);
    let items = ObsArray::from_value(&inv.get("lineItems").unwrap()).unwrap();

    let extra = line_item.create();
    items.push(extra.as_value()).unwrap();
    assert!(inv.has_changes());
    let entry = inv.changes().map_get("lineItems").unwrap();
    let added = entry.map_get("added").unwrap();
    assert_eq!(added.as_list().unwrap().borrow().len(), 1);

    // Removing the freshly added member collapses back to no change.
    items.remove_value(&extra.as_value()).unwrap();
    assert!(!inv.has_changes());
}

#[test]
fn test_undo_replays_membership() {
    let store = Store::new();
    let (invoice, line_item) = define_invoice(&store);

    let inv = load(
        &invoice,
        vec![
            ("id", Value::Integer(1)),
            (
                "lineItems",
                Value::list(vec![
                    payload(vec![("id", Value::Integer(10))]),
                    payload(vec![("id", Value::Integer(11))]),
                ]),
            ),
        ],
    );
    let items = ObsArray::from_value(&inv.get("lineItems").unwrap()).unwrap();
    let first = items.at(0).unwrap();

    // Remove one loaded member, add one new.
    items.remove_value(&first).unwrap();
    let extra = line_item.create();
    items.push(extra.as_value()).unwrap();
    assert!(inv.has_changes());

    inv.undo_changes(&UndoOptions::default()).unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.contains(&first));
    assert!(!items.contains(&extra.as_value()));
    assert!(!inv.has_changes());
}

#[test]
fn test_get_rejection_leaves_empty_with_base_error() {
    let store = Store::new();
    let mapper = ScriptedMapper::new(store.scheduler());
    let todo = store
        .define("Todo")
        .attr("name", "string")
        .mapper(mapper.clone())
        .build()
        .unwrap();

    let (model, promise) = todo.get(&Value::Integer(9), false, &Value::Null).unwrap();
    assert_eq!(model.source_state(), SourceState::Empty);
    assert!(model.is_busy());
    assert_eq!(mapper.calls(), vec!["get"]);

    mapper.reject_next(Value::from("boom"));
    store.run_until_idle();

    assert!(!model.is_busy());
    assert_eq!(model.source_state(), SourceState::Empty);
    let base = model.errors().map_get("base").unwrap();
    assert!(base
        .as_list()
        .unwrap()
        .borrow()
        .contains(&Value::from("boom")));
    assert_eq!(promise.status(), PromiseStatus::Rejected);
}

#[test]
fn test_get_success_loads() {
    let store = Store::new();
    let mapper = ScriptedMapper::new(store.scheduler());
    let todo = store
        .define("Todo")
        .attr("name", "string")
        .mapper(mapper.clone())
        .build()
        .unwrap();

    let (model, promise) = todo.get(&Value::Integer(9), false, &Value::Null).unwrap();
    mapper.resolve_next(payload(vec![
        ("id", Value::Integer(9)),
        ("name", Value::from("dishes")),
    ]));
    store.run_until_idle();

    assert_eq!(model.source_state(), SourceState::Loaded);
    assert!(!model.is_busy());
    assert_eq!(model.get("name").unwrap(), Value::from("dishes"));
    assert_eq!(promise.status(), PromiseStatus::Fulfilled);

    // A loaded instance is returned as-is, without another mapper call.
    let (again, _p) = todo.get(&Value::Integer(9), false, &Value::Null).unwrap();
    assert_eq!(
        again.instance().instance_id(),
        model.instance().instance_id()
    );
    assert_eq!(mapper.calls(), vec!["get"]);
}

#[test]
fn test_save_new_transitions_to_loaded() {
    let store = Store::new();
    let mapper = ScriptedMapper::new(store.scheduler());
    let todo = store
        .define("Todo")
        .attr("name", "string")
        .mapper(mapper.clone())
        .build()
        .unwrap();

    let model = todo.create();
    model.set("name", Value::from("dishes")).unwrap();
    assert!(model.has_changes());

    let promise = model.save(&Value::Null).unwrap();
    assert!(model.is_busy());
    assert_eq!(mapper.calls(), vec!["create"]);

    mapper.resolve_next(payload(vec![("id", Value::Integer(123))]));
    store.run_until_idle();

    assert_eq!(model.source_state(), SourceState::Loaded);
    assert!(!model.is_busy());
    assert_eq!(model.id(), Value::Integer(123));
    assert!(!model.has_changes());
    assert_eq!(promise.status(), PromiseStatus::Fulfilled);
}

#[test]
fn test_save_rejection_records_keyed_errors() {
    let store = Store::new();
    let mapper = ScriptedMapper::new(store.scheduler());
    let todo = store
        .define("Todo")
        .attr("name", "string")
        .mapper(mapper.clone())
        .build()
        .unwrap();

    let model = todo.create();
    let promise = model.save(&Value::Null).unwrap();

    mapper.reject_next(payload(vec![(
        "name",
        Value::list(vec![Value::from("is required")]),
    )]));
    store.run_until_idle();

    assert_eq!(model.source_state(), SourceState::New);
    assert!(!model.is_busy());
    let name_errors = model.errors().map_get("name").unwrap();
    assert!(name_errors
        .as_list()
        .unwrap()
        .borrow()
        .contains(&Value::from("is required")));
    assert_eq!(promise.status(), PromiseStatus::Rejected);
}

#[test]
fn test_update_used_for_loaded_models() {
    let store = Store::new();
    let mapper = ScriptedMapper::new(store.scheduler());
    let todo = store
        .define("Todo")
        .attr("name", "string")
        .mapper(mapper.clone())
        .build()
        .unwrap();

    let model = load(
        &todo,
        vec![("id", Value::Integer(1)), ("name", Value::from("a"))],
    );
    model.set("name", Value::from("b")).unwrap();
    model.save(&Value::Null).unwrap();
    assert_eq!(mapper.calls(), vec!["update"]);

    // Saving again while busy is an invalid state.
    let err = model.save(&Value::Null).unwrap_err();
    assert!(err.to_string().contains("LOADED-BUSY"));
}

#[test]
fn test_delete_loaded_goes_through_mapper() {
    let store = Store::new();
    let mapper = ScriptedMapper::new(store.scheduler());
    let todo = store
        .define("Todo")
        .mapper(mapper.clone())
        .build()
        .unwrap();

    let model = load(&todo, vec![("id", Value::Integer(1))]);
    let promise = model.delete(&Value::Null).unwrap();
    assert!(model.is_busy());
    assert_eq!(mapper.calls(), vec!["delete"]);

    mapper.resolve_next(Value::Null);
    store.run_until_idle();

    assert_eq!(model.source_state(), SourceState::Deleted);
    assert!(!model.is_busy());
    assert!(store.identity().get("Todo", &Value::Integer(1)).is_none());
    assert_eq!(promise.status(), PromiseStatus::Fulfilled);
}

#[test]
fn test_query_array_payload() {
    let store = Store::new();
    let mapper = ScriptedMapper::new(store.scheduler());
    let todo = store
        .define("Todo")
        .attr("name", "string")
        .mapper(mapper.clone())
        .build()
        .unwrap();

    let container = QueryArray::new(&todo).unwrap();
    let promise = container.query(Value::map()).unwrap();
    assert!(container.is_busy());

    mapper.resolve_next(Value::list(vec![
        payload(vec![("id", Value::Integer(1)), ("name", Value::from("a"))]),
        payload(vec![("id", Value::Integer(2)), ("name", Value::from("b"))]),
    ]));
    store.run_until_idle();

    assert!(!container.is_busy());
    assert!(container.error().is_none());
    assert_eq!(container.len(), 2);
    assert_eq!(promise.status(), PromiseStatus::Fulfilled);
}

#[test]
fn test_query_results_meta_payload() {
    let store = Store::new();
    let mapper = ScriptedMapper::new(store.scheduler());
    let todo = store
        .define("Todo")
        .attr("name", "string")
        .mapper(mapper.clone())
        .build()
        .unwrap();

    let container = QueryArray::new(&todo).unwrap();
    container.query(Value::map()).unwrap();

    mapper.resolve_next(payload(vec![
        (
            "results",
            Value::list(vec![payload(vec![("id", Value::Integer(1))])]),
        ),
        ("meta", payload(vec![("total", Value::Integer(41))])),
    ]));
    store.run_until_idle();

    assert_eq!(container.len(), 1);
    let meta = container.meta().unwrap();
    assert_eq!(meta.map_get("total"), Some(Value::Integer(41)));
}

#[test]
fn test_query_coalesces_to_one_in_flight() {
    let store = Store::new();
    let mapper = ScriptedMapper::new(store.scheduler());
    let todo = store
        .define("Todo")
        .mapper(mapper.clone())
        .build()
        .unwrap();

    let container = QueryArray::new(&todo).unwrap();
    container.query(Value::map()).unwrap();
    // Two more while busy: only the last queued request survives.
    container
        .query(payload(vec![("page", Value::Integer(2))]))
        .unwrap();
    container
        .query(payload(vec![("page", Value::Integer(3))]))
        .unwrap();
    assert_eq!(mapper.calls(), vec!["query"]);

    mapper.resolve_next(Value::list(vec![]));
    store.run_until_idle();

    // The queued request was issued after settlement.
    assert_eq!(mapper.calls(), vec!["query", "query"]);
    assert!(container.is_busy());

    mapper.resolve_next(Value::list(vec![payload(vec![("id", Value::Integer(7))])]));
    store.run_until_idle();
    assert!(!container.is_busy());
    assert_eq!(container.len(), 1);
}

#[test]
fn test_json_boundary_payload() {
    let store = Store::new();
    let (invoice, _line_item) = define_invoice(&store);

    // A mapper would hand over serde_json payloads; the boundary
    // conversion feeds them straight into load.
    let json = serde_json::json!({
        "id": 8,
        "lineItems": [
            {"id": 10, "quantity": "10", "rate": 3.5},
        ],
    });
    let attrs = orrery_core::json::from_json(&json);
    let inv = invoice.load(attrs.as_map().unwrap()).unwrap();

    let items = ObsArray::from_value(&inv.get("lineItems").unwrap()).unwrap();
    assert_eq!(items.len(), 1);
    let li = Instance::from_value(&items.at(0).unwrap()).unwrap();
    assert_eq!(li.get("quantity").unwrap(), Value::Number(10.0));
}

#[test]
fn test_query_failure_sets_error_and_recovers() {
    let store = Store::new();
    let mapper = ScriptedMapper::new(store.scheduler());
    let todo = store
        .define("Todo")
        .mapper(mapper.clone())
        .build()
        .unwrap();

    let container = QueryArray::new(&todo).unwrap();
    let promise = container.query(Value::map()).unwrap();

    mapper.reject_next(Value::from("offline"));
    store.run_until_idle();

    assert!(!container.is_busy());
    assert_eq!(container.error(), Some(Value::from("offline")));
    assert_eq!(promise.status(), PromiseStatus::Rejected);

    container.query(Value::map()).unwrap();
    mapper.resolve_next(Value::list(vec![]));
    store.run_until_idle();
    assert!(container.error().is_none());
}
