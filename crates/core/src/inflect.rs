//! Key inflection for association payloads.
//!
//! Deserialization recognizes id-reference keys in both camel and snake
//! case (`customerId` / `customer_id`, `lineItemIds` / `line_item_ids`).
//! The singularizer is a small suffix-rule table covering the key shapes
//! this layer must recognize; a full pluralization library is an external
//! collaborator and out of scope.

use convert_case::{Case, Casing};

/// Returns the singular form of an association name.
pub fn singularize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    for suffix in ["ses", "xes", "zes", "ches", "shes"] {
        if let Some(stem) = name.strip_suffix(suffix) {
            // "boxes" -> "box", "classes" -> "class"
            return format!("{stem}{}", &suffix[..suffix.len() - 2]);
        }
    }
    if name.ends_with('s') && !name.ends_with("ss") {
        return name[..name.len() - 1].to_string();
    }
    name.to_string()
}

/// Payload keys that carry a single id reference for a to-one association.
pub fn has_one_keys(name: &str) -> Vec<String> {
    let mut keys = vec![format!("{}Id", name.to_case(Case::Camel))];
    let snake = format!("{}_id", name.to_case(Case::Snake));
    if !keys.contains(&snake) {
        keys.push(snake);
    }
    keys
}

/// Payload keys that carry a list of id references for a to-many
/// association.
pub fn has_many_keys(name: &str) -> Vec<String> {
    let singular = singularize(name);
    let mut keys = vec![format!("{}Ids", singular.to_case(Case::Camel))];
    let snake = format!("{}_ids", singular.to_case(Case::Snake));
    if !keys.contains(&snake) {
        keys.push(snake);
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("todos"), "todo");
        assert_eq!(singularize("lineItems"), "lineItem");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("address"), "address");
        assert_eq!(singularize("person"), "person");
    }

    #[test]
    fn test_has_one_keys() {
        assert_eq!(has_one_keys("customer"), vec!["customerId", "customer_id"]);
        assert_eq!(
            has_one_keys("billingAddress"),
            vec!["billingAddressId", "billing_address_id"]
        );
    }

    #[test]
    fn test_has_many_keys() {
        assert_eq!(has_many_keys("todos"), vec!["todoIds", "todo_ids"]);
        assert_eq!(
            has_many_keys("lineItems"),
            vec!["lineItemIds", "line_item_ids"]
        );
    }
}
