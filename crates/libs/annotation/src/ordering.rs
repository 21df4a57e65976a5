use common_types::{ITEMS, PERSONS};
use serde_json::Value;

const SEAT_ORDER: &[&str] = &["前排右", "前排左", "中排右", "中排左", "后排右", "后排左"];
pub(crate) const OPTIONAL_SUFFIX: &str = "（若有）";
const ARMREST: &str = "中央扶手箱";
const CUP_HOLDER: &str = "中央扶手箱-杯槽";
const UNKNOWN_KIND: &str = "unknown";

/// Puts persons in seat order and items in armrest, cup holder, known, unknown order.
///
/// Both sorts are stable. Answers without the expected lists are left alone.
pub fn sort_entities(answer: &mut Value) {
    if let Some(persons) = entity_list(answer, PERSONS.group, PERSONS.list_field) {
        persons.sort_by_key(seat_rank);
    }
    if let Some(items) = entity_list(answer, ITEMS.group, ITEMS.list_field) {
        items.sort_by(|a, b| item_key(a).cmp(&item_key(b)));
    }
}

fn entity_list<'a>(answer: &'a mut Value, group: &str, list: &str) -> Option<&'a mut Vec<Value>> {
    answer.get_mut(group)?.get_mut(list)?.as_array_mut()
}

fn seat_rank(person: &Value) -> usize {
    let seat = field(person, "位置").unwrap_or_default();
    let seat = seat.strip_suffix(OPTIONAL_SUFFIX).unwrap_or(seat);
    SEAT_ORDER
        .iter()
        .position(|s| *s == seat)
        .unwrap_or(SEAT_ORDER.len())
}

fn item_key(item: &Value) -> (u8, &str, &str) {
    let kind = field(item, "种类").unwrap_or(UNKNOWN_KIND);
    let location = field(item, "位置").unwrap_or_default();
    let priority = match location {
        _ if kind.eq_ignore_ascii_case(UNKNOWN_KIND) => 3,
        ARMREST => 0,
        CUP_HOLDER => 1,
        _ => 2,
    };
    (priority, kind, location)
}

fn field<'a>(entity: &'a Value, key: &str) -> Option<&'a str> {
    entity.get(key).and_then(Value::as_str).map(str::trim)
}
