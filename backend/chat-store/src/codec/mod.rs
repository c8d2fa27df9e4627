mod clustering;

pub use clustering::{
    clustering_cmp, normalize_timestamp, ClusteringCodec, ClusteringKey, EncodedClusteringKey,
    ENCODED_LEN,
};
