extern crate proc_macro;
extern crate quote;
extern crate syn;

use proc_macro2::TokenStream;
use quote::quote;
use syn::{
    parse_macro_input, Attribute, Data, DeriveInput, Field, Fields, GenericArgument, Meta,
    NestedMeta, PathArguments, Type,
};

// #[derive(Readable)] implements io::Readable<T> for a struct T whose body
// reads (in declaration order) every stored member of T and returns Ok(T {members}).
// Members marked #[io(skip)] are not read and start out as Default::default().
#[proc_macro_derive(Readable, attributes(io))]
pub fn trivial_read_fn(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let ast = parse_macro_input!(item as DeriveInput);

    let name = &ast.ident;
    let fields = read_generate_fields(&ast.data);

    let expanded = quote! {
        impl Readable<#name> for #name {
            fn read(from: &mut dyn Buf, version: &mut Version) -> BspResult<#name> {
                Ok(#name {
                    #fields
                })
            }
        }
    };

    proc_macro::TokenStream::from(expanded)
}

// #[derive(Writable)] implements io::Writable<T> for a struct T whose body
// writes (in declaration order) every stored member of T and returns Ok
#[proc_macro_derive(Writable, attributes(io))]
pub fn trivial_write_fn(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let ast = parse_macro_input!(item as DeriveInput);

    let name = &ast.ident;
    let fields = write_generate_fields(&ast.data);

    let expanded = quote! {
        impl Writable<#name> for #name {
            fn write(&self, to: &mut dyn BufMut, version: &Version) -> BspResult<()> {
                #fields
                Ok(())
            }
        }
    };

    proc_macro::TokenStream::from(expanded)
}

fn named_fields(data: &Data) -> Vec<&Field> {
    match data {
        Data::Struct(ref data) => match data.fields {
            Fields::Named(ref fields) => fields.named.iter().collect(),
            Fields::Unnamed(_) | Fields::Unit => unimplemented!(),
        },
        Data::Enum(_) | Data::Union(_) => unimplemented!(),
    }
}

// True for #[io(skip)]
fn is_skipped(attrs: &[Attribute]) -> bool {
    attrs.iter().any(|attr| {
        if !attr.path.is_ident("io") {
            return false;
        }
        match attr.parse_meta() {
            Ok(Meta::List(list)) => list.nested.iter().any(|nested| match nested {
                NestedMeta::Meta(Meta::Path(path)) => path.is_ident("skip"),
                _ => false,
            }),
            _ => false,
        }
    })
}

// `field: FType::read(from, version)?` for each stored field
fn read_generate_fields(data: &Data) -> TokenStream {
    let field_reads = named_fields(data).into_iter().map(|f| {
        let name = &f.ident;
        if is_skipped(&f.attrs) {
            quote! {
                #name: Default::default()
            }
        } else {
            // Generics need an extra :: so split that off into its own function
            let ftype = type_turbofish(&f.ty);
            quote! {
                #name: #ftype::read(from, version)?
            }
        }
    });
    quote! {
        #(#field_reads, )*
    }
}

// `self.field.write(to, version)?` for each stored field
fn write_generate_fields(data: &Data) -> TokenStream {
    let field_writes = named_fields(data)
        .into_iter()
        .filter(|f| !is_skipped(&f.attrs))
        .map(|f| {
            let name = &f.ident;
            quote! {
                self.#name.write(to, version)?
            }
        });
    quote! {
        #(#field_writes;)*
    }
}

// We can't do Vec<u16>::read, so this function adds an extra :: before the <> to make
// this syntactically valid
fn type_turbofish(t: &Type) -> TokenStream {
    match t {
        Type::Path(typepath) => {
            let mut segments = typepath
                .path
                .segments
                .iter()
                .map(|segment| {
                    let ident = &segment.ident;

                    match &segment.arguments {
                        PathArguments::None => quote! { #ident },
                        PathArguments::AngleBracketed(args) => {
                            let mut types = args
                                .args
                                .iter()
                                .map(|genarg| match genarg {
                                    GenericArgument::Type(ty) => type_turbofish(ty),
                                    _ => unimplemented!(),
                                })
                                .collect::<Vec<_>>();

                            let first = types.remove(0);
                            quote! { #ident :: < #first #(, #types)* >}
                        }
                        PathArguments::Parenthesized(_) => unimplemented!(),
                    }
                })
                .collect::<Vec<_>>();

            let first = segments.remove(0);
            quote! { #first #( :: #segments)* }
        }
        // Arrays, tuples and references need the qualified form `<[T; N]>::read`
        _ => {
            quote! { <#t> }
        }
    }
}
