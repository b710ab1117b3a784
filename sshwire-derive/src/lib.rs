//! Derive macros for `SSHEncode` and `SSHDecode`, used by `gloam`'s
//! `sshwire.rs` and `packets.rs`.
//!
//! Setting the `SSHWIRE_DEBUG` environment variable at build time writes the
//! generated code to the `target/` directory.
//!
//! Container attributes (enums):
//! - `#[sshwire(variant_prefix)]` the variant name string is encoded before
//!   the variant's contents, making the enum self describing.
//! - `#[sshwire(no_variant_names)]` no `SSHEncodeEnum` is generated. Can't be
//!   combined with the `SSHDecode` derive.
//!
//! Field and variant attributes:
//! - `#[sshwire(variant_name = field)]` encode `field`'s variant name before
//!   this struct field.
//! - `#[sshwire(variant = "name")]` or `#[sshwire(variant = CONST)]` the wire
//!   name of an enum variant.
//! - `#[sshwire(unknown)]` the variant that captures unrecognised names. It
//!   can't be encoded.

use std::collections::HashSet;
use std::env;

use proc_macro::Delimiter;
use virtue::generate::FnSelfArg;
use virtue::parse::{Attribute, AttributeLocation, EnumBody, EnumVariant, StructBody};
use virtue::prelude::*;
use virtue::utils::{parse_tagged_attribute, ParsedAttribute};

const ENV_SSHWIRE_DEBUG: &str = "SSHWIRE_DEBUG";

#[proc_macro_derive(SSHEncode, attributes(sshwire))]
pub fn derive_encode(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    generate(input, "SSHEncode", |gen, atts, body| match body {
        Body::Struct(body) => encode_struct(gen, body),
        Body::Enum(body) => encode_enum(gen, atts, body),
    })
    .unwrap_or_else(|e| e.into_token_stream())
}

#[proc_macro_derive(SSHDecode, attributes(sshwire))]
pub fn derive_decode(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    generate(input, "SSHDecode", |gen, atts, body| match body {
        Body::Struct(body) => decode_struct(gen, body),
        Body::Enum(body) => decode_enum(gen, atts, body),
    })
    .unwrap_or_else(|e| e.into_token_stream())
}

fn generate(
    input: TokenStream,
    name: &str,
    f: impl FnOnce(&mut Generator, &[Attribute], Body) -> Result<()>,
) -> Result<TokenStream> {
    let parse = Parse::new(input)?;
    let (mut gen, atts, body) = parse.into_generator();
    f(&mut gen, &atts, body)?;
    if env::var(ENV_SSHWIRE_DEBUG).is_ok() {
        gen.export_to_file("sshwire", name);
    }
    gen.finish()
}

fn custom_err(error: impl Into<String>, span: Option<Span>) -> Error {
    Error::Custom { error: error.into(), span }
}

#[derive(Debug, Default)]
struct ContainerAtts {
    variant_prefix: bool,
    no_names: bool,
}

impl ContainerAtts {
    fn parse(atts: &[Attribute]) -> Result<Self> {
        let mut c = Self::default();
        for a in atts {
            let Some(parsed) = parse_tagged_attribute(&a.tokens, "sshwire")? else {
                continue;
            };
            for p in parsed {
                match p {
                    ParsedAttribute::Tag(l) if l.to_string() == "variant_prefix" => {
                        c.variant_prefix = true
                    }
                    ParsedAttribute::Tag(l) if l.to_string() == "no_variant_names" => {
                        c.no_names = true
                    }
                    _ => {
                        return Err(custom_err("Unknown sshwire container attribute", None))
                    }
                }
            }
        }
        Ok(c)
    }
}

/// Attributes of one struct field or enum variant
#[derive(Debug, Default)]
struct FieldAtts {
    /// `variant_name = field`
    variant_name: Option<Ident>,
    /// `variant = "name"`
    variant: Option<TokenTree>,
    /// `unknown`
    unknown: bool,
}

impl FieldAtts {
    // virtue's parse_tagged_attribute() doesn't handle literals, so this
    // walks the tokens itself.
    fn parse(atts: &[Attribute]) -> Result<Self> {
        let mut f = Self::default();
        for a in atts {
            if !matches!(a.location, AttributeLocation::Field | AttributeLocation::Variant) {
                return Err(custom_err("sshwire attribute in unexpected location", None));
            }
            let span = a.tokens.span();
            let mut toks = a.tokens.stream().into_iter();
            match toks.next() {
                Some(TokenTree::Ident(i)) if i.to_string() == "sshwire" => (),
                // some other attribute
                _ => continue,
            }
            let Some(TokenTree::Group(g)) = toks.next() else {
                return Err(custom_err("#[sshwire(...)] is missing the (...) part", Some(span)));
            };
            let mut g = g.stream().into_iter();
            let key = match g.next() {
                Some(TokenTree::Ident(k)) => k.to_string(),
                _ => return Err(Error::ExpectedIdent(span)),
            };
            if key == "unknown" {
                f.unknown = true;
            } else {
                match g.next() {
                    Some(TokenTree::Punct(p)) if p == '=' => (),
                    _ => return Err(custom_err("Missing '='", Some(span))),
                }
                let val = g
                    .next()
                    .ok_or_else(|| custom_err("Missing value", Some(span)))?;
                match (key.as_str(), val) {
                    ("variant_name", TokenTree::Ident(i)) => f.variant_name = Some(i),
                    ("variant_name", _) => return Err(Error::ExpectedIdent(span)),
                    ("variant", v) => {
                        if f.variant.replace(v).is_some() {
                            return Err(custom_err("Duplicate variant attribute", Some(span)));
                        }
                    }
                    _ => return Err(custom_err("Unknown sshwire attribute", Some(span))),
                }
            }
            if g.next().is_some() {
                return Err(custom_err("Extra unhandled parts", Some(span)));
            }
        }
        Ok(f)
    }

    /// The wire name for an enum variant
    fn wire_name(&self, var: &EnumVariant) -> Result<TokenTree> {
        self.variant.clone().ok_or_else(|| {
            custom_err(
                format!(
                    "#[sshwire(variant = ...)] is required for enum variant {}",
                    var.name
                ),
                None,
            )
        })
    }
}

/// Only unit variants and single element tuple variants are handled.
fn check_variant_shape(var: &EnumVariant) -> Result<bool> {
    match &var.fields {
        None => Ok(false),
        Some(Fields::Tuple(f)) if f.len() == 1 => Ok(true),
        _ => Err(custom_err(
            format!("sshwire enum variant {} must be a unit or single value", var.name),
            None,
        )),
    }
}

fn encode_struct(gen: &mut Generator, body: StructBody) -> Result<()> {
    gen.impl_for("crate::sshwire::SSHEncode")
        .generate_fn("enc")
        .with_generic_deps("S", ["crate::sshwire::SSHSink"])
        .with_self_arg(FnSelfArg::RefSelf)
        .with_arg("s", "&mut S")
        .with_return_type("crate::sshwire::WireResult<()>")
        .body(|fn_body| {
            match &body.fields {
                Some(Fields::Tuple(v)) => {
                    for (idx, f) in v.iter().enumerate() {
                        if !f.attributes.is_empty() {
                            return Err(custom_err(
                                "sshwire attributes aren't allowed for tuple structs",
                                Some(f.span()),
                            ));
                        }
                        fn_body.push_parsed(format!(
                            "crate::sshwire::SSHEncode::enc(&self.{idx}, s)?;"
                        ))?;
                    }
                }
                Some(Fields::Struct(v)) => {
                    for (fname, field) in v {
                        let atts = FieldAtts::parse(&field.attributes)?;
                        if let Some(enum_field) = atts.variant_name {
                            fn_body.push_parsed(format!(
                                "crate::sshwire::SSHEncode::enc(&crate::sshwire::SSHEncodeEnum::variant_name(&self.{enum_field})?, s)?;"
                            ))?;
                        }
                        fn_body.push_parsed(format!(
                            "crate::sshwire::SSHEncode::enc(&self.{fname}, s)?;"
                        ))?;
                    }
                }
                // unit or empty struct
                None => (),
            }
            fn_body.push_parsed("Ok(())")?;
            Ok(())
        })?;
    Ok(())
}

fn encode_enum(gen: &mut Generator, atts: &[Attribute], body: EnumBody) -> Result<()> {
    let cont = ContainerAtts::parse(atts)?;

    gen.impl_for("crate::sshwire::SSHEncode")
        .generate_fn("enc")
        .with_generic_deps("S", ["crate::sshwire::SSHSink"])
        .with_self_arg(FnSelfArg::RefSelf)
        .with_arg("s", "&mut S")
        .with_return_type("crate::sshwire::WireResult<()>")
        .body(|fn_body| {
            if cont.variant_prefix {
                fn_body.push_parsed(
                    "crate::sshwire::SSHEncode::enc(&crate::sshwire::SSHEncodeEnum::variant_name(self)?, s)?;",
                )?;
            }
            fn_body.push_parsed("match self")?;
            fn_body.group(Delimiter::Brace, |arms| {
                for var in &body.variants {
                    let fatts = FieldAtts::parse(&var.attributes)?;
                    let has_value = check_variant_shape(var)?;
                    let pat = if has_value {
                        format!("Self::{}(i)", var.name)
                    } else {
                        format!("Self::{}", var.name)
                    };
                    let rhs = if fatts.unknown {
                        "return Err(crate::sshwire::WireError::UnknownVariant),"
                    } else if has_value {
                        "crate::sshwire::SSHEncode::enc(i, s)?,"
                    } else {
                        "(),"
                    };
                    arms.push_parsed(format!("{pat} => {rhs}"))?;
                }
                Ok(())
            })?;
            fn_body.push_parsed("Ok(())")?;
            Ok(())
        })?;

    if !cont.no_names {
        encode_enum_names(gen, &body)?;
    }
    Ok(())
}

fn encode_enum_names(gen: &mut Generator, body: &EnumBody) -> Result<()> {
    gen.impl_for("crate::sshwire::SSHEncodeEnum")
        .generate_fn("variant_name")
        .with_self_arg(FnSelfArg::RefSelf)
        .with_return_type("crate::sshwire::WireResult<&'static str>")
        .body(|fn_body| {
            fn_body.push_parsed("let r = match self")?;
            fn_body.group(Delimiter::Brace, |arms| {
                for var in &body.variants {
                    let fatts = FieldAtts::parse(&var.attributes)?;
                    let pat = if check_variant_shape(var)? {
                        format!("Self::{}(_)", var.name)
                    } else {
                        format!("Self::{}", var.name)
                    };
                    arms.push_parsed(format!("{pat} =>"))?;
                    if fatts.unknown {
                        arms.push_parsed(
                            "return Err(crate::sshwire::WireError::UnknownVariant),",
                        )?;
                    } else {
                        arms.push(fatts.wire_name(var)?);
                        arms.puncts(",");
                    }
                }
                Ok(())
            })?;
            fn_body.push_parsed("; Ok(r)")?;
            Ok(())
        })?;
    Ok(())
}

fn decode_struct(gen: &mut Generator, body: StructBody) -> Result<()> {
    gen.impl_for_with_lifetimes("crate::sshwire::SSHDecode", ["de"])
        .modify_generic_constraints(|generics, where_constraints| {
            for lt in generics.iter_lifetimes() {
                where_constraints
                    .push_parsed_constraint(format!("'de: '{}", lt.ident))?;
            }
            Ok(())
        })?
        .generate_fn("dec")
        .with_generic_deps("S", ["crate::sshwire::SSHSource<'de>"])
        .with_arg("s", "&mut S")
        .with_return_type("crate::sshwire::WireResult<Self>")
        .body(|fn_body| {
            match &body.fields {
                Some(Fields::Tuple(v)) => {
                    fn_body.ident_str("Ok");
                    fn_body.group(Delimiter::Parenthesis, |ok| {
                        ok.ident_str("Self");
                        ok.group(Delimiter::Parenthesis, |args| {
                            for _ in v {
                                args.push_parsed("crate::sshwire::SSHDecode::dec(s)?,")?;
                            }
                            Ok(())
                        })?;
                        Ok(())
                    })?;
                }
                Some(Fields::Struct(v)) => {
                    // Enum fields named by an earlier variant_name attribute
                    // are decoded with that name
                    let mut named = HashSet::new();
                    for (fname, field) in v {
                        let atts = FieldAtts::parse(&field.attributes)?;
                        if let Some(enum_field) = atts.variant_name {
                            named.insert(enum_field.to_string());
                            fn_body.push_parsed(format!(
                                "let name_{enum_field}: crate::sshwire::BinString = crate::sshwire::SSHDecode::dec(s)?;"
                            ))?;
                        }
                        if named.contains(&fname.to_string()) {
                            fn_body.push_parsed(format!(
                                "let field_{fname} = crate::sshwire::SSHDecodeEnum::dec_enum(s, name_{fname}.0)?;"
                            ))?;
                        } else {
                            fn_body.push_parsed(format!(
                                "let field_{fname} = crate::sshwire::SSHDecode::dec(s)?;"
                            ))?;
                        }
                    }
                    fn_body.ident_str("Ok");
                    fn_body.group(Delimiter::Parenthesis, |ok| {
                        ok.ident_str("Self");
                        ok.group(Delimiter::Brace, |args| {
                            for (fname, _) in v {
                                args.push_parsed(format!("{fname}: field_{fname},"))?;
                            }
                            Ok(())
                        })?;
                        Ok(())
                    })?;
                }
                None => {
                    fn_body.push_parsed("Ok(Self {})")?;
                }
            }
            Ok(())
        })?;
    Ok(())
}

fn decode_enum(gen: &mut Generator, atts: &[Attribute], body: EnumBody) -> Result<()> {
    let cont = ContainerAtts::parse(atts)?;
    if cont.no_names {
        return Err(custom_err(
            "SSHDecode derive can't be used with #[sshwire(no_variant_names)]",
            None,
        ));
    }

    if cont.variant_prefix {
        decode_enum_variant_prefix(gen)?;
    }
    decode_enum_names(gen, &body)
}

fn decode_enum_variant_prefix(gen: &mut Generator) -> Result<()> {
    gen.impl_for_with_lifetimes("crate::sshwire::SSHDecode", ["de"])
        .modify_generic_constraints(|generics, where_constraints| {
            for lt in generics.iter_lifetimes() {
                where_constraints
                    .push_parsed_constraint(format!("'de: '{}", lt.ident))?;
            }
            Ok(())
        })?
        .generate_fn("dec")
        .with_generic_deps("S", ["crate::sshwire::SSHSource<'de>"])
        .with_arg("s", "&mut S")
        .with_return_type("crate::sshwire::WireResult<Self>")
        .body(|fn_body| {
            fn_body.push_parsed(
                "let variant: crate::sshwire::BinString = crate::sshwire::SSHDecode::dec(s)?;",
            )?;
            fn_body.push_parsed("crate::sshwire::SSHDecodeEnum::dec_enum(s, variant.0)")?;
            Ok(())
        })
}

fn decode_enum_names(gen: &mut Generator, body: &EnumBody) -> Result<()> {
    gen.impl_for_with_lifetimes("crate::sshwire::SSHDecodeEnum", ["de"])
        .modify_generic_constraints(|generics, where_constraints| {
            for lt in generics.iter_lifetimes() {
                where_constraints
                    .push_parsed_constraint(format!("'de: '{}", lt.ident))?;
            }
            Ok(())
        })?
        .generate_fn("dec_enum")
        .with_generic_deps("S", ["crate::sshwire::SSHSource<'de>"])
        .with_arg("s", "&mut S")
        .with_arg("variant", "&'de [u8]")
        .with_return_type("crate::sshwire::WireResult<Self>")
        .body(|fn_body| {
            // Some(name) for an ascii name, otherwise None
            fn_body.push_parsed(
                "let var_str = crate::sshwire::try_as_ascii_str(variant).ok();",
            )?;
            fn_body.push_parsed("let r = match var_str")?;
            fn_body.group(Delimiter::Brace, |arms| {
                let mut unknown = None;
                for var in &body.variants {
                    let fatts = FieldAtts::parse(&var.attributes)?;
                    let has_value = check_variant_shape(var)?;
                    if fatts.unknown {
                        if unknown.replace(var.name.to_string()).is_some() {
                            return Err(custom_err(
                                "only one variant can have #[sshwire(unknown)]",
                                None,
                            ));
                        }
                        continue;
                    }
                    arms.push_parsed("Some")?;
                    arms.group(Delimiter::Parenthesis, |p| {
                        p.push(fatts.wire_name(var)?);
                        Ok(())
                    })?;
                    if has_value {
                        arms.push_parsed(format!(
                            "=> Self::{}(crate::sshwire::SSHDecode::dec(s)?),",
                            var.name
                        ))?;
                    } else {
                        arms.push_parsed(format!("=> Self::{},", var.name))?;
                    }
                }
                // The fallthrough arm goes last
                match unknown {
                    Some(name) => arms.push_parsed(format!(
                        "_ => {{ s.ctx().seen_unknown = true; Self::{name}(crate::packets::Unknown(variant)) }}"
                    ))?,
                    None => arms.push_parsed(
                        "_ => return Err(crate::sshwire::WireError::UnknownVariant),",
                    )?,
                };
                Ok(())
            })?;
            fn_body.push_parsed("; Ok(r)")?;
            Ok(())
        })?;
    Ok(())
}
