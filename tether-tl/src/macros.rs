// Declarative stand-ins for the schema code generator.
//
// `tl_constructor!` defines a bare type: the struct, its constructor id, a
// boxed `Serializable` (id first) and a bare `Deserializable` (fields only).
// `tl_enum!` defines a boxed type whose variants are matched on the leading
// constructor id. `tl_function!` defines an RPC function and its return type.

macro_rules! tl_constructor {
    (
        $(#[$meta:meta])*
        pub struct $name:ident = $id:literal {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty ),+
        }

        impl $crate::Identifiable for $name {
            const CONSTRUCTOR_ID: u32 = $id;
        }

        impl $crate::Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                $crate::Serializable::serialize(&<Self as $crate::Identifiable>::CONSTRUCTOR_ID, buf);
                $( $crate::Serializable::serialize(&self.$field, buf); )+
            }
        }

        impl $crate::Deserializable for $name {
            fn deserialize(buf: $crate::deserialize::Buffer) -> $crate::deserialize::Result<Self> {
                $( let $field = <$ty as $crate::Deserializable>::deserialize(buf)?; )+
                Ok(Self { $( $field ),+ })
            }
        }
    };
}

macro_rules! tl_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $variant:ident ( $ty:ty ) ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub enum $name {
            $( $variant($ty) ),+
        }

        impl $name {
            /// Constructor id of the wrapped value.
            pub fn constructor_id(&self) -> u32 {
                match self {
                    $( Self::$variant(_) => <$ty as $crate::Identifiable>::CONSTRUCTOR_ID ),+
                }
            }
        }

        impl $crate::Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                match self {
                    $( Self::$variant(x) => $crate::Serializable::serialize(x, buf) ),+
                }
            }
        }

        impl $crate::Deserializable for $name {
            fn deserialize(buf: $crate::deserialize::Buffer) -> $crate::deserialize::Result<Self> {
                let id = <u32 as $crate::Deserializable>::deserialize(buf)?;
                $(
                    if id == <$ty as $crate::Identifiable>::CONSTRUCTOR_ID {
                        return Ok(Self::$variant(<$ty as $crate::Deserializable>::deserialize(buf)?));
                    }
                )+
                Err($crate::deserialize::Error::UnexpectedConstructor { id })
            }
        }

        $(
            #[cfg(feature = "impl-from-type")]
            impl From<$ty> for $name {
                fn from(x: $ty) -> Self { Self::$variant(x) }
            }
        )+
    };
}

macro_rules! tl_function {
    (
        $(#[$meta:meta])*
        pub struct $name:ident = $id:literal -> $ret:ty {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty ),+ $(,)?
        }
    ) => {
        tl_constructor! {
            $(#[$meta])*
            pub struct $name = $id {
                $( $(#[$fmeta])* pub $field: $ty ),+
            }
        }

        impl $crate::RemoteCall for $name {
            type Return = $ret;
        }
    };
}
