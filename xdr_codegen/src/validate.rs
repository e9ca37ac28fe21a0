// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use crate::ast::*;
use crate::{Result, SeriaError};

/// A schema that has passed name resolution, id assignment, and the
/// default-value checks below. Codegen only ever runs against one of these.
pub struct ValidatedSchema {
    pub schema: Schema,
}

impl ValidatedSchema {
    pub fn validate(schema: Schema) -> Result<ValidatedSchema> {
        for name in &schema.order {
            if let Some(Definition::Aggregate(a)) = schema.definitions.get(name) {
                validate_aggregate(&schema, a)?;
            }
        }
        Ok(ValidatedSchema { schema })
    }
}

/// Struct and table members share every validation rule (spec.md § 9: the
/// keyword distinction is purely a codegen label, not a wire or validation
/// concern).
fn validate_aggregate(schema: &Schema, a: &AggregateDecl) -> Result<()> {
    for member in &a.members {
        let qualified = format!("{}.{}", a.name, member.name);
        let Some(default) = &member.default else {
            continue;
        };

        match &member.ty {
            TypeRef::Decl(decl_name) => match schema.definitions.get(decl_name) {
                Some(Definition::Enum(e)) => {
                    let Literal::Int(n) = default else {
                        return Err(SeriaError::Validate {
                            member: qualified,
                            msg: "enum default must be an integer literal".to_string(),
                        });
                    };
                    if !e.values.contains(n) {
                        return Err(SeriaError::Validate {
                            member: qualified,
                            msg: format!("{n} is not a value of enum {decl_name}"),
                        });
                    }
                }
                _ => {
                    return Err(SeriaError::Validate {
                        member: qualified,
                        msg: format!(
                            "default values are not allowed on struct/table-typed members (type {decl_name})"
                        ),
                    });
                }
            },
            TypeRef::Primitive(Primitive::Boolean) => match default {
                Literal::Int(0) | Literal::Int(1) => {}
                Literal::Int(n) => {
                    return Err(SeriaError::Validate {
                        member: qualified,
                        msg: format!("boolean default must be 0 or 1, found {n}"),
                    })
                }
                Literal::Str(_) => {
                    return Err(SeriaError::Validate {
                        member: qualified,
                        msg: "boolean default must be an integer literal".to_string(),
                    })
                }
            },
            TypeRef::Primitive(Primitive::String) => match default {
                Literal::Str(_) => {}
                Literal::Int(_) => {
                    return Err(SeriaError::Validate {
                        member: qualified,
                        msg: "string default must be a string literal".to_string(),
                    })
                }
            },
            TypeRef::Primitive(p) if p.is_integer() => match default {
                Literal::Int(_) => {}
                Literal::Str(_) => {
                    return Err(SeriaError::Validate {
                        member: qualified,
                        msg: "integer default must be an integer literal".to_string(),
                    })
                }
            },
            TypeRef::Primitive(_) => unreachable!("every Primitive variant is covered above"),
            TypeRef::Unresolved(n) => unreachable!("{n} should have been resolved by now"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::resolver;
    use crate::scanner::Scanner;

    fn try_validate(src: &str) -> Result<()> {
        let schema = Parser::new(Scanner::new(src))?.parse()?;
        let schema = resolver::resolve(schema)?;
        ValidatedSchema::validate(schema)?;
        Ok(())
    }

    #[test]
    fn integer_default_is_allowed() {
        assert!(try_validate("struct A { x: uint8 = 3; }").is_ok());
    }

    #[test]
    fn string_default_must_be_a_string() {
        let err = try_validate("struct A { x: string = 3; }").unwrap_err();
        assert!(matches!(err, SeriaError::Validate { .. }));
    }

    #[test]
    fn integer_default_must_be_an_integer() {
        let err = try_validate(r#"struct A { x: uint8 = "nope"; }"#).unwrap_err();
        assert!(matches!(err, SeriaError::Validate { .. }));
    }

    #[test]
    fn boolean_default_rejects_other_integers() {
        let err = try_validate("struct A { x: boolean = 2; }").unwrap_err();
        assert!(matches!(err, SeriaError::Validate { .. }));
    }

    #[test]
    fn boolean_default_accepts_zero_or_one() {
        assert!(try_validate("struct A { x: boolean = 0; y: boolean = 1; }").is_ok());
    }

    #[test]
    fn struct_typed_members_cannot_have_defaults() {
        let src = "struct B { z: uint8; } struct A { b: B = 1; }";
        let err = try_validate(src).unwrap_err();
        assert!(matches!(err, SeriaError::Validate { .. }));
    }

    #[test]
    fn string_default_is_allowed() {
        assert!(try_validate(r#"struct A { x: string = "hi"; }"#).is_ok());
    }

    #[test]
    fn enum_default_must_be_a_member_value() {
        let src = "enum Color : uint8 { Red, Green, Blue } struct A { c: Color = 5; }";
        let err = try_validate(src).unwrap_err();
        assert!(matches!(err, SeriaError::Validate { .. }));
    }

    #[test]
    fn enum_default_accepts_a_member_value() {
        let src = "enum Color : uint8 { Red, Green, Blue } struct A { c: Color = 1; }";
        assert!(try_validate(src).is_ok());
    }
}
