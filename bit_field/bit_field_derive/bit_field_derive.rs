// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Implementation of the `#[bitfield]` attribute macro. See `bit_field`'s
//! crate docs for the field syntax this accepts.

use proc_macro::TokenStream;
use quote::format_ident;
use quote::quote;
use syn::parse_macro_input;
use syn::spanned::Spanned;
use syn::Data;
use syn::DeriveInput;
use syn::Fields;
use syn::Ident;
use syn::Type;

struct FieldInfo {
    ident: Ident,
    width: u32,
    is_bool: bool,
}

/// A field's type is either the literal `bool` (a 1-bit field) or
/// `BitFieldN`, whose width is read out of the trailing digits of `N`.
fn field_width(ty: &Type) -> syn::Result<(u32, bool)> {
    let path = match ty {
        Type::Path(p) => &p.path,
        _ => return Err(syn::Error::new(ty.span(), "expected `bool` or `BitFieldN`")),
    };
    let segment = path
        .segments
        .last()
        .ok_or_else(|| syn::Error::new(ty.span(), "expected `bool` or `BitFieldN`"))?;
    let name = segment.ident.to_string();
    if name == "bool" {
        return Ok((1, true));
    }
    let width = name
        .strip_prefix("BitField")
        .and_then(|digits| digits.parse::<u32>().ok())
        .ok_or_else(|| syn::Error::new(ty.span(), "expected `bool` or `BitFieldN`"))?;
    Ok((width, false))
}

fn repr_for(total_bits: u32) -> syn::Result<Ident> {
    let name = if total_bits == 0 {
        return Err(syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[bitfield] struct has no fields",
        ));
    } else if total_bits <= 8 {
        "u8"
    } else if total_bits <= 16 {
        "u16"
    } else if total_bits <= 32 {
        "u32"
    } else if total_bits <= 64 {
        "u64"
    } else {
        return Err(syn::Error::new(
            proc_macro2::Span::call_site(),
            format!("#[bitfield] struct is {total_bits} bits wide, more than the 64-bit maximum"),
        ));
    };
    Ok(format_ident!("{}", name))
}

#[proc_macro_attribute]
pub fn bitfield(_args: TokenStream, input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand(input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let vis = &input.vis;
    let attrs = &input.attrs;

    let fields = match &input.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new(
                    input.span(),
                    "#[bitfield] requires named fields",
                ))
            }
        },
        _ => return Err(syn::Error::new(input.span(), "#[bitfield] only applies to structs")),
    };

    let mut infos = Vec::new();
    let mut total_bits = 0u32;
    for f in fields {
        let ident = f.ident.clone().expect("named field");
        let (width, is_bool) = field_width(&f.ty)?;
        total_bits += width;
        infos.push(FieldInfo { ident, width, is_bool });
    }

    let repr = repr_for(total_bits)?;

    // Fields are declared most-significant-first: walk them in order,
    // carving each field's width off the top of the remaining range.
    let mut remaining = total_bits;
    let mut methods = Vec::new();
    for info in &infos {
        remaining -= info.width;
        let shift = remaining as u8;
        let get_name = format_ident!("get_{}", info.ident);
        let set_name = format_ident!("set_{}", info.ident);

        if info.is_bool {
            methods.push(quote! {
                pub fn #get_name(&self) -> bool {
                    (self.0 >> #shift) & 1 == 1
                }

                pub fn #set_name(&mut self, value: bool) {
                    if value {
                        self.0 |= 1 << #shift;
                    } else {
                        self.0 &= !(1 << #shift);
                    }
                }
            });
        } else {
            let width = info.width;
            let mask: u64 = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
            methods.push(quote! {
                pub fn #get_name(&self) -> u32 {
                    ((self.0 >> #shift) as u64 & #mask) as u32
                }

                pub fn #set_name(&mut self, value: u32) {
                    let masked = (value as u64 & #mask) as #repr;
                    self.0 = (self.0 & !(((#mask as #repr)) << #shift)) | (masked << #shift);
                }
            });
        }
    }

    Ok(quote! {
        #(#attrs)*
        #vis struct #name(#repr);

        impl #name {
            #(#methods)*
        }

        impl ::std::convert::From<#repr> for #name {
            fn from(value: #repr) -> Self {
                #name(value)
            }
        }

        impl ::std::convert::From<#name> for #repr {
            fn from(value: #name) -> Self {
                value.0
            }
        }
    })
}
