//! 单选字段的取值范围
//!
//! 远端表把分类字段存为字符串，这里给出录入时可选的固定取值，
//! 命令行参数通过 `clap::ValueEnum` 直接约束输入。

use std::fmt;

/// 生成带有线上字符串表示的单选枚举
macro_rules! wire_choice {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// 全部取值，按表单顺序
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// 远端表中的字符串取值
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }
    };
}

wire_choice! {
    /// 性别
    Gender {
        Male => "Male",
        Female => "Female",
    }
}

wire_choice! {
    /// 分离菌种
    Species {
        EColi => "E. coli",
        Klebsiella => "Klebsiella spp.",
        Proteus => "Proteus spp.",
        Pseudomonas => "Pseudomonas spp.",
        Acinetobacter => "Acinetobacter spp.",
    }
}

wire_choice! {
    /// 收治科室
    Setting {
        Icu => "ICU",
        InternalMedicine => "Internal Medicine",
    }
}

wire_choice! {
    /// 感染获得途径
    Acquisition {
        Community => "Community",
        Hospital => "Hospital",
    }
}

wire_choice! {
    /// 血流感染来源
    BsiSource {
        Primary => "Primary",
        Lung => "Lung",
        Abdomen => "Abdomen",
        Uti => "UTI",
    }
}

wire_choice! {
    /// 0/1 指示字段（合并症、耐药结果等）
    Flag {
        #[value(name = "0")]
        No => "0",
        #[value(name = "1")]
        Yes => "1",
    }
}
