// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Turns the raw parse tree into a schema where every type reference points
//! at a concrete [`Primitive`] or declared name, every enum member carries an
//! explicit value, and every struct/table member carries a `field_id` while
//! every struct/table declaration carries a `table_id`.
//!
//! Resolution runs in two passes. The first resolves names (depth-first,
//! detecting cycles along the way); the second walks the schema in source
//! order to hand out the stable numeric ids the wire format depends on
//! (declaration order, not resolution order, as the ids must be stable under
//! reordering of unrelated declarations).

use std::collections::HashSet;

use log::debug;

use crate::ast::*;
use crate::{Result, SeriaError};

pub fn resolve(mut schema: Schema) -> Result<Schema> {
    resolve_names(&mut schema)?;
    assign_ids(&mut schema);
    debug!("resolved {} definitions", schema.order.len());
    Ok(schema)
}

fn resolve_names(schema: &mut Schema) -> Result<()> {
    let order = schema.order.clone();
    for name in &order {
        let mut visiting = HashSet::new();
        resolve_definition(schema, name, &mut visiting)?;
    }
    Ok(())
}

/// Resolves the type references owned directly by `name`'s definition.
/// `visiting` tracks the chain of declarations currently being resolved, so a
/// reference back to one of them is reported as [`SeriaError::Cycle`] instead
/// of overflowing the stack.
fn resolve_definition(
    schema: &mut Schema,
    name: &str,
    visiting: &mut HashSet<String>,
) -> Result<()> {
    if !visiting.insert(name.to_string()) {
        let mut cycle: Vec<String> = visiting.iter().cloned().collect();
        cycle.push(name.to_string());
        return Err(SeriaError::Cycle(cycle));
    }

    let unresolved: Vec<(usize, String)> = match schema.definitions.get(name) {
        Some(Definition::Enum(e)) => match &e.underlying {
            TypeRef::Unresolved(n) => vec![(usize::MAX, n.clone())],
            _ => Vec::new(),
        },
        Some(Definition::Aggregate(a)) => a
            .members
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.ty.as_unresolved_name().map(|n| (i, n.to_string())))
            .collect(),
        None => Vec::new(),
    };

    for (_, ref_name) in &unresolved {
        if schema.definitions.contains_key(ref_name) {
            resolve_definition(schema, ref_name, visiting)?;
        }
    }

    for (idx, ref_name) in unresolved {
        let resolved = resolve_type_name(schema, name, &ref_name)?;
        match schema.definitions.get_mut(name) {
            Some(Definition::Enum(e)) => e.underlying = resolved,
            Some(Definition::Aggregate(a)) => a.members[idx].ty = resolved,
            None => unreachable!(),
        }
    }

    if let Some(Definition::Enum(e)) = schema.definitions.get(name) {
        match &e.underlying {
            TypeRef::Primitive(p) if !p.is_integer() => {
                return Err(SeriaError::Resolve {
                    member: name.to_string(),
                    msg: format!("enum underlying type must be an integer primitive, found {p:?}"),
                });
            }
            TypeRef::Decl(decl_name) => {
                return Err(SeriaError::Resolve {
                    member: name.to_string(),
                    msg: format!(
                        "enum underlying type must be an integer primitive, found declared type {decl_name:?}"
                    ),
                });
            }
            _ => {}
        }
    }

    if let Some(Definition::Enum(e)) = schema.definitions.get_mut(name) {
        assign_enum_values(e)?;
    }

    visiting.remove(name);
    Ok(())
}

fn resolve_type_name(schema: &Schema, owner: &str, name: &str) -> Result<TypeRef> {
    if let Some(prim) = Primitive::lookup(name) {
        return Ok(TypeRef::Primitive(prim));
    }
    if schema.definitions.contains_key(name) {
        return Ok(TypeRef::Decl(name.to_string()));
    }
    Err(SeriaError::Resolve {
        member: owner.to_string(),
        msg: format!("undefined type {name:?}"),
    })
}

/// Implements the `prev.value + 1`, starting at 0, rule for members that
/// don't specify a value explicitly.
fn assign_enum_values(e: &mut EnumDecl) -> Result<()> {
    let mut next = 0u64;
    for m in &mut e.members {
        let value = m.value.unwrap_or(next);
        m.value = Some(value);
        e.values.insert(value);
        next = value + 1;
    }
    Ok(())
}

/// Hands out `table_id` (struct/table declarations, source order) and
/// `field_id` (per declaration, 0-based in source order). Enums never carry
/// either.
fn assign_ids(schema: &mut Schema) {
    let mut next_table_id = 0u32;
    let order = schema.order.clone();
    for name in order {
        if let Some(Definition::Aggregate(a)) = schema.definitions.get_mut(&name) {
            a.table_id = Some(next_table_id);
            next_table_id += 1;
            for (i, member) in a.members.iter_mut().enumerate() {
                member.field_id = Some(i as u16);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::scanner::Scanner;

    fn resolve_source(src: &str) -> Result<Schema> {
        let schema = Parser::new(Scanner::new(src)).unwrap().parse().unwrap();
        resolve(schema)
    }

    #[test]
    fn builtin_alias_resolves_to_primitive() {
        let schema = resolve_source("struct A { x: uint32; }").unwrap();
        let Some(Definition::Aggregate(a)) = schema.get("A") else {
            panic!("missing A");
        };
        assert_eq!(a.members[0].ty, TypeRef::Primitive(Primitive::UInt32));
        assert_eq!(a.table_id, Some(0));
        assert_eq!(a.members[0].field_id, Some(0));
    }

    #[test]
    fn forward_reference_resolves() {
        let schema = resolve_source("struct A { x: B; } struct B { y: uint8; }").unwrap();
        let Some(Definition::Aggregate(a)) = schema.get("A") else {
            panic!("missing A");
        };
        assert_eq!(a.members[0].ty, TypeRef::Decl("B".to_string()));
    }

    #[test]
    fn undefined_type_is_an_error() {
        let err = resolve_source("struct A { x: Nope; }").unwrap_err();
        assert!(matches!(err, SeriaError::Resolve { .. }));
    }

    #[test]
    fn direct_cycle_is_detected() {
        let err = resolve_source("struct A { x: B; } struct B { y: A; }").unwrap_err();
        assert!(matches!(err, SeriaError::Cycle(_)));
    }

    #[test]
    fn enum_values_default_to_prev_plus_one() {
        let schema = resolve_source("enum Color { Red, Green, Blue = 10, Alias = 10 }").unwrap();
        let Some(Definition::Enum(e)) = schema.get("Color") else {
            panic!("missing Color");
        };
        assert_eq!(e.members[0].value, Some(0));
        assert_eq!(e.members[1].value, Some(1));
        assert_eq!(e.members[2].value, Some(10));
        assert_eq!(e.members[3].value, Some(10));
        assert_eq!(e.values.len(), 3);
    }

    #[test]
    fn table_ids_follow_source_order_and_skip_enums() {
        let schema =
            resolve_source("enum E { A } table T1 { x: uint8; } table T2 { y: uint8; }").unwrap();
        let Some(Definition::Aggregate(t1)) = schema.get("T1") else {
            panic!();
        };
        let Some(Definition::Aggregate(t2)) = schema.get("T2") else {
            panic!();
        };
        assert_eq!(t1.table_id, Some(0));
        assert_eq!(t2.table_id, Some(1));
    }

    #[test]
    fn non_integer_enum_underlying_is_rejected() {
        let err = resolve_source("enum E : string { A }").unwrap_err();
        assert!(matches!(err, SeriaError::Resolve { .. }));
    }

    #[test]
    fn enum_underlying_naming_an_aggregate_is_rejected() {
        let err = resolve_source("table T { x: uint8; } enum E : T { A }").unwrap_err();
        assert!(matches!(err, SeriaError::Resolve { .. }));
    }
}
